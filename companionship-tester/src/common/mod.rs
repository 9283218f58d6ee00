pub mod scenario;
pub mod util;

pub use util::{load_base_config, parse_seeds, split_csv};
