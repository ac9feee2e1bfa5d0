pub mod checkpoint;
mod imprint;
mod input;
mod output;
pub mod settings;

pub use imprint::{write_footer, write_header};
pub use input::*;
pub use output::{write_results, ResultsSummary};
pub use settings::{ReadMode, ResponseConfig};
