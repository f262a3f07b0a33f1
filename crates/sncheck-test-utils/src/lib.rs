pub mod mock_store;
pub mod sandbox;

pub use mock_store::{MockStore, MockStoreBuilder, make_token};
