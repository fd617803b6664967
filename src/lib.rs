// synth-core: collateralized synthetic asset engine.
// debt positions back a price-fed synthetic; margin calls, forced settlement
// and global settlement keep every share redeemable for collateral.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, AssetAmount, Timestamp, chain constants
//   2.x  price.rs: integer-rational Price, conversions, call/squeeze prices
//   3.x  order.rs: limit orders and the price-ordered book
//   4.x  position.rs: margin positions, call-price and collateral indices
//   5.x  asset.rs: synthetic asset state, feed median aggregation
//   6.x  settlement.rs: forced settlement queue, collateral bids
//   7.x  events.rs: state transition events for audit
//   8.x  params.rs: chain-wide parameters
//   9.x  ops.rs: the input operations
//   10.x engine/: the engine: matching, margin, feeds, settling, swan

pub mod asset;
pub mod engine;
pub mod events;
pub mod ops;
pub mod order;
pub mod params;
pub mod position;
pub mod price;
pub mod settlement;
pub mod types;

// re exports for convenience
pub use asset::*;
pub use engine::*;
pub use events::*;
pub use ops::*;
pub use order::*;
pub use params::*;
pub use position::*;
pub use price::*;
pub use settlement::*;
pub use types::*;
