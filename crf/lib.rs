#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod admm;
pub mod dataset;
pub mod evaluate;
pub mod median;
pub mod model;
pub mod pairwise;
pub mod progress;

#[path = "../shared/files.rs"]
pub mod shared_files;
pub mod shared {
    pub use super::shared_files as files;
}
