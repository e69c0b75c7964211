//! Token symbol cleaning (§4.5.2 step 2): strip non-ASCII, Unicode
//! normalize to NFKD, lower-case, then map known wrapped-asset symbols to
//! their underlying asset so `WETH`/`weth`/`wETH` all resolve to `"eth"`.

use unicode_normalization::UnicodeNormalization;

/// Cleans and normalizes a raw on-chain token symbol.
pub fn clean_symbol(raw: &str) -> String {
    let ascii_nfkd: String = raw.nfkd().filter(char::is_ascii).collect();
    let lower = ascii_nfkd.to_lowercase();
    unwrap_known(&lower).to_string()
}

/// Maps a cleaned symbol to its underlying asset if it is a recognized
/// wrapper, otherwise returns it unchanged.
fn unwrap_known(symbol: &str) -> &str {
    match symbol {
        "weth" => "eth",
        "wbtc" => "btc",
        "wmatic" => "matic",
        "wavax" => "avax",
        "wbnb" => "bnb",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_known_wrappers() {
        assert_eq!(clean_symbol("WETH"), "eth");
        assert_eq!(clean_symbol("wBTC"), "btc");
    }

    #[test]
    fn passes_through_unknown_symbols() {
        assert_eq!(clean_symbol("ARB"), "arb");
        assert_eq!(clean_symbol("USDC"), "usdc");
    }

    #[test]
    fn strips_non_ascii() {
        // A fullwidth variant normalizes under NFKD to its ASCII form.
        assert_eq!(clean_symbol("ＡＲＢ"), "arb");
    }
}
