//! Terminal outputs: [`ProductBin`] for successes, [`ScrapBin`] for everything discarded.

mod product;
mod scrap;

pub use product::ProductBin;
pub use scrap::{Scrap, ScrapBin, SiteSnapshot};
