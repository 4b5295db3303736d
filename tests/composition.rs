mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Field, Person, Record, people};
use conveyor::{
    Builder, Capabilities, Cart, CollectionBuilder, CollectionLabel, ConveyorBuilder,
    ConveyorConfig, ConveyorError, Event, EventKind, FORWARDED, FailureType, ForwardResult,
    KeyFilter, ParallelConveyor, ProductError, Registry, ResultQueue, RuntimeError,
    ScrapCollector, SiteStatus, Subscribe,
};
use parking_lot::Mutex;
use tokio::time;

fn cart(key: u32, field: Field, value: &str) -> Cart<u32, Field, String> {
    Cart::new(key, field, value.to_string())
}

/// Turns a forwarded record into a greeting.
#[derive(Default)]
struct Greeting {
    record: Option<Record>,
}

impl Builder<u32, &'static str, Record> for Greeting {
    type Product = String;

    fn build(&mut self) -> anyhow::Result<String> {
        let record = self
            .record
            .take()
            .ok_or_else(|| anyhow::anyhow!("no record"))?;
        Ok(format!("Hello, {} {}", record.first, record.last))
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE.with_self_test()
    }

    fn test(&self) -> bool {
        self.record.is_some()
    }
}

type Greetings = ResultQueue<u32, String>;

/// Conveyor named "greetings" that turns forwarded records into greetings.
fn greeter(
    registry: &Registry,
    results: &Greetings,
) -> ConveyorBuilder<u32, &'static str, Record, Greeting> {
    ConveyorBuilder::new(ConveyorConfig::named("greetings"))
        .with_supplier(Greeting::default)
        .with_dispatcher(|_l: &&'static str, r: Record, g: &mut Greeting| {
            g.record = Some(r);
            Ok(())
        })
        .with_result_consumer(results.clone())
        .with_registry(registry.clone())
}

fn forward_to_greeter(
    registry: &Registry,
) -> ForwardResult<u32, Record, u32, &'static str, Greeting> {
    ForwardResult::new(registry.clone(), "people", "greetings", "record")
}

#[tokio::test(start_paused = true)]
async fn forwards_products_to_a_registered_conveyor() {
    let registry = Registry::new();
    let greetings = Greetings::new();
    let target = greeter(&registry, &greetings).build().unwrap();

    let forward = forward_to_greeter(&registry).with_key_transform(|k: &u32| k + 100);
    let source = people(ConveyorConfig::named("people"))
        .with_result_consumer(forward)
        .with_registry(registry.clone())
        .build()
        .unwrap();
    assert_eq!(registry.names(), vec!["greetings".to_string(), "people".to_string()]);

    for (field, value) in [(Field::First, "Ann"), (Field::Last, "Lee"), (Field::Year, "1")] {
        source.place(cart(1, field, value)).await;
    }
    time::sleep(Duration::from_millis(10)).await;

    let bin = greetings.poll().unwrap();
    assert_eq!(bin.key, 101);
    assert_eq!(bin.product, "Hello, Ann Lee");
    assert_eq!(bin.property(FORWARDED), Some("people"));

    source.complete_and_stop().await.unwrap();
    target.complete_and_stop().await.unwrap();
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn forwards_timeout_forced_products() {
    let registry = Registry::new();
    let greetings = Greetings::new();
    let target = greeter(&registry, &greetings).build().unwrap();

    let scraps = ScrapCollector::<u32, Field, String>::new();
    let source = people(ConveyorConfig {
        default_build_timeout: Duration::from_millis(100),
        idle_heartbeat: Duration::from_millis(10),
        ..ConveyorConfig::named("people")
    })
    .with_timeout_action(|p: &mut Person| {
        p.last.get_or_insert_with(|| "Unknown".into());
        Ok(())
    })
    .with_result_consumer(forward_to_greeter(&registry))
    .with_scrap_consumer(scraps.clone())
    .build()
    .unwrap();

    source.place(cart(1, Field::First, "Ann")).await;
    source.place(cart(1, Field::Year, "1990")).await;
    time::sleep(Duration::from_millis(150)).await;

    assert!(scraps.is_empty());
    let bin = greetings.poll().unwrap();
    assert_eq!(bin.key, 1);
    assert_eq!(bin.product, "Hello, Ann Unknown");

    source.stop();
    target.stop();
}

#[tokio::test(start_paused = true)]
async fn rejected_forward_fails_the_source_build() {
    let registry = Registry::new();
    let greetings = Greetings::new();
    let target = greeter(&registry, &greetings)
        .accept_labels(["greeting"])
        .build()
        .unwrap();

    let scraps = ScrapCollector::<u32, Field, String>::new();
    let source = people(ConveyorConfig::named("people"))
        .with_result_consumer(forward_to_greeter(&registry))
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    let product = source.future(1);
    for (field, value) in [(Field::First, "Ann"), (Field::Last, "Lee"), (Field::Year, "1")] {
        source.place(cart(1, field, value)).await;
    }
    assert!(matches!(
        product.await,
        Err(ProductError::Failed(ConveyorError::ResultConsumer { .. }))
    ));
    assert_eq!(scraps.count(FailureType::ResultConsumerFailed), 1);
    assert!(greetings.is_empty());

    source.stop();
    target.stop();
}

#[tokio::test(start_paused = true)]
async fn dropped_conveyor_leaves_the_registry() {
    let registry = Registry::new();
    let conveyor = people(ConveyorConfig::named("kept"))
        .with_registry(registry.clone())
        .build()
        .unwrap();
    assert!(registry.conveyor::<u32, Field, String, Person>("kept").is_some());

    drop(conveyor);
    time::sleep(Duration::from_millis(10)).await;

    assert!(registry.is_empty());
    assert!(registry.conveyor::<u32, Field, String, Person>("kept").is_none());
}

#[tokio::test(start_paused = true)]
async fn registry_rejects_duplicate_names() {
    let registry = Registry::new();
    let first = people(ConveyorConfig::named("dup"))
        .with_registry(registry.clone())
        .build()
        .unwrap();
    let second = people(ConveyorConfig::named("dup"))
        .with_registry(registry.clone())
        .build();
    assert!(matches!(second, Err(RuntimeError::NameTaken { .. })));
    first.stop();
}

#[tokio::test(start_paused = true)]
async fn collection_builder_collects_until_complete() {
    let results = ResultQueue::new();
    let conveyor = ConveyorBuilder::new(ConveyorConfig {
        default_build_timeout: Duration::from_millis(100),
        idle_heartbeat: Duration::from_millis(10),
        ..ConveyorConfig::named("collect")
    })
    .with_supplier(CollectionBuilder::<u32>::new)
    .with_labels(CollectionBuilder::labels())
    .with_result_consumer(results.clone())
    .build()
    .unwrap();

    let product = conveyor.future("batch");
    for i in 1..=3 {
        conveyor.place(Cart::new("batch", CollectionLabel::Item, Some(i))).await;
    }
    conveyor.place(Cart::new("batch", CollectionLabel::Complete, None)).await;
    assert_eq!(product.await.unwrap(), vec![1, 2, 3]);

    // Without completion, only a timeout-completing collection delivers.
    conveyor.set_builder_supplier(|| CollectionBuilder::new().complete_on_timeout());
    conveyor.place(Cart::new("partial", CollectionLabel::Item, Some(7))).await;
    time::sleep(Duration::from_millis(150)).await;

    let bins = results.drain();
    assert_eq!(bins.len(), 2);
    assert_eq!(bins[1].key, "partial");
    assert_eq!(bins[1].product, vec![7]);
    assert_eq!(bins[1].status, SiteStatus::TimedOut);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn parallel_conveyor_spreads_keys() {
    let results = ResultQueue::new();
    let parallel = ParallelConveyor::build(4, |i| {
        people(ConveyorConfig::named(format!("shard-{i}")))
            .with_result_consumer(results.clone())
            .build()
    })
    .unwrap();
    assert_eq!(parallel.shards().len(), 4);

    for key in 0..40 {
        parallel.place(cart(key, Field::First, "A")).await;
        parallel.place(cart(key, Field::Last, "B")).await;
    }
    assert_eq!(parallel.collector_size(), 40);
    assert!(parallel.shards().iter().filter(|s| s.collector_size() > 0).count() > 1);

    // Multi-key carts reach every shard.
    let year = Cart::multi_key(KeyFilter::all(), Field::Year, "1999".to_string());
    assert!(parallel.place(year).await.is_accepted());

    parallel.complete_and_stop().await.unwrap();
    assert_eq!(results.len(), 40);
    assert!(!parallel.is_running());
}

#[tokio::test(start_paused = true)]
async fn product_supplier_reads_partial_builds() {
    let conveyor = people(ConveyorConfig {
        synchronize_builder: true,
        ..ConveyorConfig::named("cache")
    })
    .build()
    .unwrap();

    conveyor.place(cart(1, Field::First, "Ann")).await;
    let supplier = conveyor.product_supplier(1).await.unwrap();
    assert!(matches!(supplier.get(), Err(ConveyorError::Build { .. })));

    conveyor.place(cart(1, Field::Last, "Lee")).await;
    let partial = supplier.get().unwrap();
    assert_eq!(partial.last, "Lee");
    assert_eq!(partial.year, None);

    conveyor.place(cart(1, Field::Year, "2020")).await;
    assert_eq!(supplier.status(), SiteStatus::Ready);
    assert!(matches!(supplier.get(), Err(ConveyorError::SiteClosed { .. })));

    assert!(matches!(
        conveyor.product_supplier(2).await,
        Err(ConveyorError::KeyNotFound { .. })
    ));
    conveyor.stop();

    let plain = people(ConveyorConfig::default()).build().unwrap();
    plain.place(cart(1, Field::First, "Ann")).await;
    assert!(matches!(
        plain.product_supplier(1).await,
        Err(ConveyorError::NotSynchronized)
    ));
    plain.stop();
}

#[derive(Default)]
struct Recorder {
    kinds: Mutex<Vec<EventKind>>,
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.kinds.lock().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test(start_paused = true)]
async fn subscribers_receive_events() {
    let recorder = Arc::new(Recorder::default());
    let conveyor = people(ConveyorConfig::named("observed"))
        .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
        .build()
        .unwrap();

    for (field, value) in [(Field::First, "A"), (Field::Last, "B"), (Field::Year, "1")] {
        conveyor.place(cart(1, field, value)).await;
    }
    conveyor.complete_and_stop().await.unwrap();
    time::sleep(Duration::from_millis(10)).await;

    let kinds = recorder.kinds.lock().clone();
    assert_eq!(kinds.first(), Some(&EventKind::ConveyorStarted));
    assert!(kinds.contains(&EventKind::ProductReady));
    assert_eq!(kinds.last(), Some(&EventKind::ConveyorStopped));
}

#[test]
fn person_builder_is_usable_directly() {
    let mut p = Person::default();
    common::dispatch(&Field::First, "A".into(), &mut p).unwrap();
    assert!(<Person as Builder<u32, Field, String>>::build(&mut p).is_err());
}
