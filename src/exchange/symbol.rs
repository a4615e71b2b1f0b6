//! Canonical <-> exchange-native symbol normalization and validation.
//!
//! Rules validated against `examples/original_source/TWAP/TWAPOrder.py`'s
//! `format_symbol_for_exchange`: canonical symbols use a `BASE-QUOTE` form
//! (e.g. `BTC-USDT`); each exchange has its own native spelling.

use crate::error::GatewayError;
use crate::models::ExchangeId;

/// `^[A-Z0-9\-_.]{1,20}$`, hand-rolled since no part of the reference stack
/// pulls in the `regex` crate for anything this small.
pub fn validate_canonical_symbol(symbol: &str) -> Result<(), GatewayError> {
    let len_ok = !symbol.is_empty() && symbol.len() <= 20;
    let chars_ok = symbol
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));

    if len_ok && chars_ok {
        Ok(())
    } else {
        Err(GatewayError::InvalidSymbol(symbol.to_string()))
    }
}

/// Canonical `BASE-QUOTE` -> this exchange's native spelling.
pub fn normalize_symbol(exchange: ExchangeId, canonical: &str) -> String {
    match exchange {
        ExchangeId::Binance => canonical.replace(['-', '/'], ""),
        ExchangeId::Okx => {
            if !canonical.contains('-') && canonical.len() > 4 {
                let split = canonical.len() - 4;
                format!("{}-{}", &canonical[..split], &canonical[split..])
            } else {
                canonical.to_string()
            }
        }
        ExchangeId::CoinbasePro => {
            let dashed = if !canonical.contains('-') && canonical.len() > 4 {
                let split = canonical.len() - 4;
                format!("{}-{}", &canonical[..split], &canonical[split..])
            } else {
                canonical.to_string()
            };
            dashed.replace("USDT", "USD")
        }
        ExchangeId::Kraken => {
            let (base, quote) = split_base_quote(canonical);
            let base = if base == "BTC" { "XBT" } else { base };
            format!("{base}/{quote}")
        }
    }
}

/// Native spelling -> canonical `BASE-QUOTE`. The inverse of [`normalize_symbol`].
pub fn denormalize_symbol(exchange: ExchangeId, native: &str) -> String {
    match exchange {
        ExchangeId::Binance => {
            // Binance has no separator; longest known quote suffix wins.
            for quote in ["USDT", "USDC", "BUSD", "USD", "BTC", "ETH"] {
                if native.len() > quote.len() && native.ends_with(quote) {
                    let base = &native[..native.len() - quote.len()];
                    return format!("{base}-{quote}");
                }
            }
            native.to_string()
        }
        ExchangeId::Okx | ExchangeId::CoinbasePro => native.to_string(),
        ExchangeId::Kraken => {
            let native = native.replace('/', "-");
            if native.starts_with("XBT-") {
                format!("BTC-{}", &native[4..])
            } else {
                native
            }
        }
    }
}

fn split_base_quote(canonical: &str) -> (&str, &str) {
    if let Some((base, quote)) = canonical.split_once('-') {
        (base, quote)
    } else if canonical.len() > 4 {
        let split = canonical.len() - 4;
        (&canonical[..split], &canonical[split..])
    } else {
        (canonical, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binance_strips_separators() {
        assert_eq!(normalize_symbol(ExchangeId::Binance, "BTC-USDT"), "BTCUSDT");
        assert_eq!(normalize_symbol(ExchangeId::Binance, "BTC/USDT"), "BTCUSDT");
    }

    #[test]
    fn okx_inserts_dash_when_absent() {
        assert_eq!(normalize_symbol(ExchangeId::Okx, "BTCUSDT"), "BTC-USDT");
        assert_eq!(normalize_symbol(ExchangeId::Okx, "BTC-USDT"), "BTC-USDT");
    }

    #[test]
    fn coinbase_pro_rewrites_usdt_to_usd() {
        assert_eq!(
            normalize_symbol(ExchangeId::CoinbasePro, "BTC-USDT"),
            "BTC-USD"
        );
        assert_eq!(
            normalize_symbol(ExchangeId::CoinbasePro, "BTCUSDT"),
            "BTC-USD"
        );
    }

    #[test]
    fn kraken_maps_btc_to_xbt() {
        assert_eq!(normalize_symbol(ExchangeId::Kraken, "BTC-USD"), "XBT/USD");
        assert_eq!(normalize_symbol(ExchangeId::Kraken, "ETH-USD"), "ETH/USD");
    }

    #[test]
    fn validator_accepts_canonical_shapes() {
        assert!(validate_canonical_symbol("BTC-USDT").is_ok());
        assert!(validate_canonical_symbol("BTC_USDT.P").is_ok());
        assert!(validate_canonical_symbol("btc-usdt").is_err());
        assert!(validate_canonical_symbol("").is_err());
        assert!(validate_canonical_symbol(&"A".repeat(21)).is_err());
    }

    #[test]
    fn denormalize_roundtrips_kraken() {
        assert_eq!(denormalize_symbol(ExchangeId::Kraken, "XBT/USD"), "BTC-USD");
    }
}
