//! # conveyor
//!
//! **Conveyor** is an in-memory assembly engine. Parts of a product arrive
//! independently, out of order and from many producers as keyed *carts*; the
//! engine routes every cart to the builder of its key, decides when the build
//! is complete, and delivers the product (or the reason it failed) exactly once.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   producer A        producer B        producer C
//!       │ place(cart)     │ place(cart)     │ add_command(cmd)
//!       ▼                 ▼                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  AssemblingConveyor (cloneable handle)                            │
//! │  - placement checks (running, expired, too old, user validators)  │
//! │  - live settings (supplier, dispatcher, readiness, sinks, hooks)  │
//! └──────┬───────────────────────────────────┬────────────────────────┘
//!        ▼ cart queue                        ▼ control queue
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Worker (single writer)                                           │
//! │  - collector: key ─► BuildingSite (builder + accumulated state)   │
//! │  - DelayIndex: expiration ─► keys                                 │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ResultConsumer      ScrapConsumer      Bus (broadcast events)
//!  (ProductBin)        (ScrapBin)              │
//!                                              ▼
//!                                        SubscriberSet
//!                                   ┌──────────┼──────────┐
//!                                   ▼          ▼          ▼
//!                               sub1.on    sub2.on    subN.on
//!                               _event()   _event()   _event()
//! ```
//!
//! ### Lifecycle of one key
//! ```text
//! first cart ──► supplier() ──► BuildingSite{WaitingData}
//!
//! every cart ──► label handler | default dispatcher ──► builder
//!            ──► postpone expiration (optional)
//!            ──► ready? ─ no ─► wait for more
//!                  └─ yes ─► eviction hooks ──► build() ──► ResultConsumer ──► product handles
//!
//! expiration ──► timeout action ──► ready? ─ yes ─► build (tagged TimedOut)
//!                                     └─ no ──► BUILD_EXPIRED scrap
//!
//! any failure ──► one ScrapBin tagged with the failing stage, product handles fail
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                               |
//! |-------------------|--------------------------------------------------------------|--------------------------------------------------|
//! | **Engine**        | Assemble products from keyed parts.                          | [`AssemblingConveyor`], [`ConveyorBuilder`]      |
//! | **Builders**      | Per-key accumulators with optional capabilities.             | [`Builder`], [`Capabilities`], [`LabelTable`]    |
//! | **Input**         | Data carts, commands, completion handles.                    | [`Cart`], [`Command`], [`CartHandle`]            |
//! | **Output**        | Products and scrap.                                          | [`ResultConsumer`], [`ScrapConsumer`]            |
//! | **Subscriber API**| Hook into engine events (logging, metrics, custom).          | [`Subscribe`], [`Event`]                         |
//! | **Sharding**      | Spread keys over several engines.                            | [`ParallelConveyor`]                             |
//! | **Errors**        | Typed errors and failure stages.                             | [`ConveyorError`], [`FailureType`], [`RuntimeError`] |
//! | **Configuration** | Centralize engine settings.                                  | [`ConveyorConfig`]                               |
//!
//! ## Example
//! ```rust
//! use conveyor::{Builder, Capabilities, Cart, ConveyorBuilder, ConveyorConfig, ResultQueue};
//!
//! #[derive(Default)]
//! struct Person { first: Option<String>, last: Option<String> }
//!
//! impl Builder<u32, &'static str, String> for Person {
//!     type Product = String;
//!
//!     fn build(&mut self) -> anyhow::Result<String> {
//!         Ok(format!("{} {}", self.first.take().unwrap_or_default(), self.last.take().unwrap_or_default()))
//!     }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::NONE.with_self_test()
//!     }
//!
//!     fn test(&self) -> bool {
//!         self.first.is_some() && self.last.is_some()
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let results = ResultQueue::new();
//!     let conveyor = ConveyorBuilder::new(ConveyorConfig::named("people"))
//!         .with_supplier(Person::default)
//!         .with_dispatcher(|label: &&'static str, v: String, p: &mut Person| {
//!             match *label {
//!                 "first" => p.first = Some(v),
//!                 _ => p.last = Some(v),
//!             }
//!             Ok(())
//!         })
//!         .with_result_consumer(results.clone())
//!         .build()?;
//!
//!     let product = conveyor.future(1);
//!     conveyor.place(Cart::new(1, "last", "Doe".to_string())).await;
//!     conveyor.place(Cart::new(1, "first", "John".to_string())).await;
//!
//!     assert_eq!(product.await?, "John Doe");
//!     conveyor.complete_and_stop().await?;
//!     Ok(())
//! }
//! ```

mod bins;
mod builders;
mod building;
mod carts;
mod consumers;
mod core;
mod error;
mod events;
mod parallel;
mod subscribers;

// ---- Public re-exports ----

pub use bins::{ProductBin, Scrap, ScrapBin, SiteSnapshot};
pub use builders::{CollectionBuilder, CollectionLabel};
pub use building::{
    Builder, BuilderSupplier, Capabilities, Dispatcher, EvictionHook, LabelHandler, LabelTable,
    ReadinessFn, State, TimeoutAction,
};
pub use carts::{
    Cart, CartHandle, CartKey, CartLabel, CartValue, Command, CommandKind, KeyFilter, Outcome,
    ProductError, ProductHandle,
};
pub use consumers::{
    FORWARDED, ForwardResult, IgnoreResult, LastResultReference, LogResult, LogScrap,
    LastScrapReference, ResultChain, ResultConsumer, ResultQueue, ScrapCollector, ScrapConsumer,
};
pub use crate::core::{
    AssemblingConveyor, CartValidator, ConveyorBuilder, ConveyorConfig, ProductSupplier, Registry,
    SiteStatus,
};
pub use error::{ConveyorError, FailureType, RuntimeError};
pub use events::{Event, EventKind};
pub use parallel::ParallelConveyor;
pub use subscribers::Subscribe;

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
