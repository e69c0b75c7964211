//! Uniswap V3-family price reading and swap decoding.
//!
//! V3 stores price directly as `sqrtPriceX96` (a Q64.96 fixed-point √P),
//! unlike V2 which stores reserves and derives price. A single `slot0()`
//! call gives the current price at any block; the `Swap` event carries
//! the post-swap `sqrtPriceX96` directly, so no reserve math is needed.

pub mod decode;
pub mod price;
pub mod slot0;

pub use decode::{decode_swap, TOPIC0};
pub use price::{sqrt_price_x96_to_price, PriceResult};
pub use slot0::{fetch_slot0_via_call, fetch_slot0_via_storage, Slot0Data, V3_WETH_USDC_POOL};
