mod common;

use std::time::Duration;

use common::{Field, Person, people};
use conveyor::{
    Cart, ConveyorBuilder, ConveyorConfig, ConveyorError, FailureType, Outcome, ProductError,
    Scrap, ScrapCollector,
};
use tokio::time;

type Scraps = ScrapCollector<u32, Field, String>;

#[tokio::test(start_paused = true)]
async fn expired_cart_is_rejected_and_scrapped_once() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    let expired = Cart::new(1, Field::First, "Ann".to_string()).with_ttl(Duration::ZERO);
    let outcome = conveyor.place(expired).await;

    assert!(matches!(outcome, Outcome::Rejected(ConveyorError::CartExpired { .. })));
    assert_eq!(scraps.len(), 1);
    assert_eq!(scraps.count(FailureType::CartRejected), 1);
    assert!(matches!(scraps.snapshot()[0].scrap, Scrap::Cart(_)));

    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(conveyor.collector_size(), 0);
    assert_eq!(scraps.len(), 1);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn old_carts_are_rejected() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();
    conveyor.reject_carts_older_than(Duration::from_millis(10));

    let stale = Cart::new(1, Field::First, "Ann".to_string());
    time::advance(Duration::from_millis(20)).await;
    let outcome = conveyor.place(stale).await;
    assert!(matches!(outcome, Outcome::Rejected(ConveyorError::CartTooOld { .. })));

    let fresh = Cart::new(1, Field::First, "Ann".to_string());
    assert!(conveyor.place(fresh).await.is_accepted());
    assert_eq!(scraps.count(FailureType::CartRejected), 1);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn carts_going_stale_in_the_queue_are_rejected() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();
    conveyor.reject_carts_older_than(Duration::from_millis(10));

    // Queued while fresh; the worker sees it only after the clock moved on.
    let queued = conveyor.place(Cart::new(1, Field::First, "Ann".to_string()));
    time::advance(Duration::from_millis(20)).await;

    assert!(matches!(queued.await, Outcome::Rejected(ConveyorError::CartTooOld { .. })));
    assert_eq!(scraps.count(FailureType::CartRejected), 1);
    assert_eq!(conveyor.collector_size(), 0);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn validators_may_reconfigure_the_conveyor() {
    let conveyor = people(ConveyorConfig::default()).build().unwrap();
    let handle = conveyor.clone();
    conveyor.add_cart_validator(move |_cart: &Cart<u32, Field, String>| {
        handle.set_keep_carts_on_site(true);
        Ok(())
    });
    let reconfigure = conveyor.clone();
    conveyor.set_builder_supplier(move || {
        reconfigure.set_idle_heartbeat(Duration::from_millis(5));
        Person::default()
    });

    let outcome = conveyor
        .place(Cart::new(1, Field::First, "Ann".to_string()))
        .await;
    assert_eq!(outcome, Outcome::Accepted);
    assert_eq!(conveyor.collector_size(), 1);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn label_allow_list_and_custom_validators() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_scrap_consumer(scraps.clone())
        .accept_labels([Field::First, Field::Last])
        .with_validator(|cart: &Cart<u32, Field, String>| {
            if cart.value().is_empty() {
                return Err(ConveyorError::Validation {
                    error: "empty value".into(),
                });
            }
            Ok(())
        })
        .build()
        .unwrap();

    let year = conveyor
        .place(Cart::new(1, Field::Year, "1999".to_string()))
        .await;
    assert_eq!(
        year,
        Outcome::Rejected(ConveyorError::LabelRejected {
            label: "Year".into()
        })
    );
    let empty = conveyor.place(Cart::new(1, Field::First, String::new())).await;
    assert!(matches!(empty, Outcome::Rejected(ConveyorError::Validation { .. })));
    assert_eq!(scraps.count(FailureType::CartRejected), 2);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn placement_after_stop_is_rejected() {
    let conveyor = people(ConveyorConfig::default()).build().unwrap();
    conveyor.stop();

    let outcome = conveyor.place(Cart::new(1, Field::First, "A".to_string())).await;
    assert_eq!(outcome, Outcome::Rejected(ConveyorError::NotRunning));
    let command = conveyor.cancel(1).await;
    assert_eq!(command, Outcome::Rejected(ConveyorError::NotRunning));
    assert!(matches!(
        conveyor.future(1).await,
        Err(ProductError::Failed(ConveyorError::NotRunning))
    ));
}

#[tokio::test(start_paused = true)]
async fn dispatch_failure_invalidates_the_build() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    let product = conveyor.future(5);
    conveyor.place(Cart::new(5, Field::First, "A".to_string())).await;
    let outcome = conveyor
        .place(Cart::new(5, Field::Year, "nineteen".to_string()))
        .await;

    assert!(matches!(outcome, Outcome::Failed(ConveyorError::Dispatch { .. })));
    assert!(matches!(product.await, Err(ProductError::Failed(ConveyorError::Dispatch { .. }))));
    assert_eq!(scraps.count(FailureType::DataRejected), 1);
    assert!(matches!(scraps.snapshot()[0].scrap, Scrap::Cart(_)));
    assert_eq!(conveyor.collector_size(), 0);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn missing_supplier_fails_site_creation() {
    let scraps = Scraps::new();
    let conveyor = ConveyorBuilder::<u32, Field, String, Person>::new(ConveyorConfig::default())
        .with_dispatcher(common::dispatch)
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    let outcome = conveyor.place(Cart::new(1, Field::First, "A".to_string())).await;
    assert_eq!(outcome, Outcome::Failed(ConveyorError::MissingBuilderSupplier));
    assert_eq!(scraps.count(FailureType::BuildInitializationFailed), 1);

    // A per-build supplier overrides the missing default.
    let created = conveyor.create_build_with(2, Person::default).await;
    assert!(created.is_accepted());
    assert_eq!(conveyor.collector_size(), 1);
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn panics_in_user_code_are_isolated() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_dispatcher(|label: &Field, v: String, p: &mut Person| {
            if v == "boom" {
                panic!("dispatcher exploded");
            }
            common::dispatch(label, v, p)
        })
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    let outcome = conveyor.place(Cart::new(1, Field::First, "boom".to_string())).await;
    match outcome {
        Outcome::Failed(ConveyorError::Panicked { info }) => {
            assert!(info.contains("dispatcher exploded"))
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    // The worker keeps serving other keys.
    let product = conveyor.future(2);
    for (field, value) in [(Field::First, "A"), (Field::Last, "B"), (Field::Year, "3")] {
        conveyor.place(Cart::new(2, field, value.to_string())).await;
    }
    assert_eq!(product.await.unwrap().first, "A");
    assert!(conveyor.is_running());
    conveyor.stop();
}

#[tokio::test(start_paused = true)]
async fn build_and_result_consumer_failures_are_tagged() {
    let scraps = Scraps::new();
    let conveyor = people(ConveyorConfig::default())
        .with_readiness(|state: &conveyor::State<u32, Field, String>, _p: &Person| {
            state.has(&Field::First)
        })
        .with_result_consumer(
            |bin: &conveyor::ProductBin<u32, common::Record>| -> anyhow::Result<()> {
                anyhow::ensure!(bin.key != 9, "key 9 is not welcome");
                Ok(())
            },
        )
        .with_scrap_consumer(scraps.clone())
        .build()
        .unwrap();

    // Ready, but the last name is missing.
    let outcome = conveyor.place(Cart::new(1, Field::First, "A".to_string())).await;
    assert!(matches!(outcome, Outcome::Failed(ConveyorError::Build { .. })));
    assert_eq!(scraps.count(FailureType::BuildFailed), 1);

    // Built, but the consumer refuses it.
    let product = conveyor.future(9);
    conveyor.place(Cart::new(9, Field::Last, "B".to_string())).await;
    let outcome = conveyor.place(Cart::new(9, Field::First, "A".to_string())).await;
    assert!(matches!(outcome, Outcome::Failed(ConveyorError::ResultConsumer { .. })));
    assert!(matches!(
        product.await,
        Err(ProductError::Failed(ConveyorError::ResultConsumer { .. }))
    ));
    assert_eq!(scraps.count(FailureType::ResultConsumerFailed), 1);
    assert!(matches!(scraps.snapshot()[1].scrap, Scrap::Site(_)));
    conveyor.stop();
}
