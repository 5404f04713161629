//! CAR (Content Addressable aRchive) file I/O
//!
//! CAR files are how a chain is exported for offline transfer, and what
//! [`FileBlockStore`](crate::storage::FileBlockStore) persists to.
//!
//! # Examples
//!
//! Exporting a chain:
//! ```ignore
//! use naam_chain::car::export_chain_car;
//!
//! export_chain_car("chain.car", &store, head).await?;
//! ```
//!
//! Loading it into another store:
//! ```ignore
//! use naam_chain::car::import_chain_car;
//!
//! let bytes = tokio::fs::read("chain.car").await?;
//! let head = import_chain_car(&bytes, &store).await?;
//! ```

pub mod reader;
pub mod writer;

pub use reader::{ParsedCar, import_chain_car, parse_car_bytes, read_car, read_car_header};
pub use writer::{encode_car, export_chain_car, write_car};
