//! Output sinks: where finished products and discarded work go.
//!
//! ## Contents
//! - [`ResultConsumer`] and built-ins ([`ResultQueue`], [`LastResultReference`],
//!   [`LogResult`], [`ForwardResult`], [`ResultChain`])
//! - [`ScrapConsumer`] and built-ins ([`LogScrap`], [`LastScrapReference`], [`ScrapCollector`])
//!
//! Consumers are synchronous and run on the worker task: keep them short.

mod result;
mod scrap;

pub use result::{
    FORWARDED, ForwardResult, IgnoreResult, LastResultReference, LogResult, ResultChain,
    ResultConsumer, ResultQueue,
};
pub use scrap::{LastScrapReference, LogScrap, ScrapCollector, ScrapConsumer};
