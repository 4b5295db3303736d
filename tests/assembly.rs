mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Field, Person, Record, init_tracing, people};
use conveyor::{
    Cart, ConveyorConfig, KeyFilter, LabelTable, Outcome, ProductBin, ResultQueue, SiteStatus,
};
use parking_lot::Mutex;

fn cart(key: u32, field: Field, value: &str) -> Cart<u32, Field, String> {
    Cart::new(key, field, value.to_string())
}

#[tokio::test(start_paused = true)]
async fn assembles_parts_in_any_order() {
    init_tracing();
    let results = ResultQueue::new();
    let conveyor = people(ConveyorConfig::named("people"))
        .with_result_consumer(results.clone())
        .build()
        .unwrap();

    let product = conveyor.future(7);
    assert_eq!(conveyor.place(cart(7, Field::Year, "1970")).await, Outcome::Accepted);
    assert_eq!(conveyor.place(cart(7, Field::Last, "Doe")).await, Outcome::Accepted);
    assert_eq!(conveyor.place(cart(7, Field::First, "John")).await, Outcome::Accepted);

    let expected = Record {
        first: "John".into(),
        last: "Doe".into(),
        year: Some(1970),
    };
    assert_eq!(product.await.unwrap(), expected);

    let bin = results.poll().unwrap();
    assert_eq!(bin.key, 7);
    assert_eq!(bin.status, SiteStatus::Ready);
    assert_eq!(bin.product, expected);
    assert!(results.is_empty());
    assert_eq!(conveyor.collector_size(), 0);

    conveyor.complete_and_stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn creates_one_site_per_key() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&created);
    let conveyor = people(ConveyorConfig::default())
        .with_supplier(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Person::default()
        })
        .build()
        .unwrap();

    conveyor.place(cart(1, Field::First, "Ann")).await;
    conveyor.place(cart(1, Field::Last, "Lee")).await;
    conveyor.place(cart(2, Field::First, "Bob")).await;
    conveyor.place(cart(1, Field::First, "Anna")).await;

    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(conveyor.collector_size(), 2);

    // After delivery the key starts over with a fresh builder.
    conveyor.place(cart(2, Field::Last, "Ray")).await;
    conveyor.place(cart(2, Field::Year, "2001")).await;
    conveyor.place(cart(2, Field::Year, "2002")).await;
    assert_eq!(created.load(Ordering::SeqCst), 3);

    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn evicts_before_build() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (evictions, deliveries) = (Arc::clone(&log), Arc::clone(&log));
    let conveyor = people(ConveyorConfig::default())
        .with_before_eviction(move |key: &u32| {
            evictions.lock().push(format!("evict {key}"));
            Ok(())
        })
        .with_result_consumer(move |bin: &ProductBin<u32, Record>| -> anyhow::Result<()> {
            deliveries.lock().push(format!("deliver {}", bin.key));
            Ok(())
        })
        .build()
        .unwrap();

    for (field, value) in [(Field::First, "A"), (Field::Last, "B"), (Field::Year, "1")] {
        conveyor.place(cart(3, field, value)).await;
    }
    assert_eq!(*log.lock(), vec!["evict 3".to_string(), "deliver 3".to_string()]);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn label_handler_wins_over_dispatcher() {
    let labels = LabelTable::new().on(Field::First, |p: &mut Person, v: String| {
        p.first = Some(v.to_uppercase());
        Ok(())
    });
    let conveyor = people(ConveyorConfig::default())
        .with_labels(labels)
        .build()
        .unwrap();

    let product = conveyor.future(1);
    conveyor.place(cart(1, Field::First, "john")).await;
    conveyor.place(cart(1, Field::Last, "doe")).await;
    conveyor.place(cart(1, Field::Year, "1999")).await;

    let record = product.await.unwrap();
    assert_eq!(record.first, "JOHN");
    assert_eq!(record.last, "doe");
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn state_readiness_counts_labels() {
    let conveyor = people(ConveyorConfig::default())
        .with_readiness(|state: &conveyor::State<u32, Field, String>, _p: &Person| {
            state.has_all(&[Field::First, Field::Last])
        })
        .build()
        .unwrap();

    let product = conveyor.future(4);
    conveyor.place(cart(4, Field::Last, "Doe")).await;
    conveyor.place(cart(4, Field::First, "Jane")).await;

    let record = product.await.unwrap();
    assert_eq!(record.year, None);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn multi_key_cart_updates_matching_sites_only() {
    let results = ResultQueue::new();
    let conveyor = people(ConveyorConfig::default())
        .with_result_consumer(results.clone())
        .build()
        .unwrap();

    // No site exists yet: the broadcast creates nothing.
    let broadcast = Cart::multi_key(KeyFilter::all(), Field::Year, "2000".to_string());
    assert!(conveyor.place(broadcast).await.is_accepted());
    assert_eq!(conveyor.collector_size(), 0);

    for key in 1..=3 {
        conveyor.place(cart(key, Field::First, "X")).await;
    }
    let odd = Cart::multi_key(KeyFilter::new(|k: &u32| k % 2 == 1), Field::Last, "Odd".to_string());
    conveyor.place(odd).await;
    for key in 1..=3 {
        conveyor.place(cart(key, Field::Year, "2000")).await;
    }

    let mut delivered: Vec<u32> = results.drain().into_iter().map(|b| b.key).collect();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![1, 3]);
    assert_eq!(conveyor.collector_size(), 1);
    conveyor.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_complete_every_key() {
    const KEYS: u32 = 200;
    let results = ResultQueue::new();
    let conveyor = people(ConveyorConfig::named("concurrent"))
        .with_result_consumer(results.clone())
        .build()
        .unwrap();

    let producers: Vec<_> = [
        (Field::First, "First"),
        (Field::Last, "Last"),
        (Field::Year, "1984"),
    ]
    .into_iter()
    .map(|(field, value)| {
        let conveyor = conveyor.clone();
        tokio::spawn(async move {
            for key in 0..KEYS {
                let outcome = conveyor.place(cart(key, field, value)).await;
                assert!(outcome.is_accepted(), "{outcome:?}");
            }
        })
    })
    .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    conveyor.complete_and_stop().await.unwrap();

    let bins = results.drain();
    assert_eq!(bins.len(), KEYS as usize);
    assert!(bins.iter().all(|b| b.product.first == "First" && b.product.year == Some(1984)));
}
