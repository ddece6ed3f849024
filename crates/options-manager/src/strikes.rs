//! Strike rounding and selection.
//!
//! Everything here is pure: the live strike list is passed in by the caller.

use std::collections::BTreeMap;

use opt_algo_core::{ExchangeConfig, Moneyness, StrikeDistance};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ResolutionError;

/// Call and put strikes of a two-leg position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrikePair {
    pub call: Decimal,
    pub put: Decimal,
}

/// Strike spacing per asset.
#[derive(Debug, Clone)]
pub struct StrikeTable {
    increments: BTreeMap<String, Decimal>,
}

impl StrikeTable {
    pub fn new(increments: BTreeMap<String, Decimal>) -> Self {
        let increments = increments
            .into_iter()
            .map(|(asset, inc)| (asset.to_uppercase(), inc))
            .collect();
        Self { increments }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(config.strike_increments.clone())
    }

    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] when the asset has no entry.
    pub fn increment(&self, asset: &str) -> Result<Decimal, ResolutionError> {
        self.increments
            .get(&asset.to_uppercase())
            .copied()
            .ok_or_else(|| ResolutionError::UnsupportedAsset(asset.to_string()))
    }

    /// Nearest multiple of the increment; ties round up.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn round_to_strike(&self, price: Decimal, asset: &str) -> Result<Decimal, ResolutionError> {
        self.round_with(price, asset, RoundingStrategy::MidpointAwayFromZero)
    }

    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn round_up_to_strike(&self, price: Decimal, asset: &str) -> Result<Decimal, ResolutionError> {
        self.round_with(price, asset, RoundingStrategy::ToPositiveInfinity)
    }

    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn round_down_to_strike(&self, price: Decimal, asset: &str) -> Result<Decimal, ResolutionError> {
        self.round_with(price, asset, RoundingStrategy::ToNegativeInfinity)
    }

    fn round_with(
        &self,
        price: Decimal,
        asset: &str,
        strategy: RoundingStrategy,
    ) -> Result<Decimal, ResolutionError> {
        let inc = self.increment(asset)?;
        Ok(((price / inc).round_dp_with_strategy(0, strategy) * inc).normalize())
    }

    /// True for positive multiples of the asset's increment.
    pub fn is_valid_strike(&self, strike: Decimal, asset: &str) -> bool {
        self.increment(asset)
            .map(|inc| strike > Decimal::ZERO && (strike % inc).is_zero())
            .unwrap_or(false)
    }

    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn atm_strike(&self, spot: Decimal, asset: &str, offset: i32) -> Result<Decimal, ResolutionError> {
        let inc = self.increment(asset)?;
        Ok((self.round_to_strike(spot, asset)? + inc * Decimal::from(offset)).normalize())
    }

    /// Strikes on either side of spot, call above and put below.
    ///
    /// `live` is only read for [`StrikeDistance::Numeral`].
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn otm_strikes(
        &self,
        spot: Decimal,
        asset: &str,
        distance: StrikeDistance,
        live: &[Decimal],
    ) -> Result<StrikePair, ResolutionError> {
        self.strangle_strikes(spot, asset, Moneyness::Otm, distance, live)
    }

    /// Mirror of [`Self::otm_strikes`]: call below spot, put above.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn itm_strikes(
        &self,
        spot: Decimal,
        asset: &str,
        distance: StrikeDistance,
        live: &[Decimal],
    ) -> Result<StrikePair, ResolutionError> {
        self.strangle_strikes(spot, asset, Moneyness::Itm, distance, live)
    }

    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn strangle_strikes(
        &self,
        spot: Decimal,
        asset: &str,
        moneyness: Moneyness,
        distance: StrikeDistance,
        live: &[Decimal],
    ) -> Result<StrikePair, ResolutionError> {
        let points = match distance {
            StrikeDistance::Percentage(pct) => spot * pct / Decimal::ONE_HUNDRED,
            StrikeDistance::Absolute(points) => points,
            StrikeDistance::Numeral(n) => {
                let atm = self.round_to_strike(spot, asset)?;
                return Ok(match numeral_strikes(live, atm, n, moneyness) {
                    Some(pair) => pair,
                    None => {
                        let inc = self.increment(asset)?;
                        self.pair_around(atm, inc * Decimal::from(n), moneyness, asset)?
                    }
                });
            }
        };
        self.pair_around(spot, points, moneyness, asset)
    }

    fn pair_around(
        &self,
        centre: Decimal,
        points: Decimal,
        moneyness: Moneyness,
        asset: &str,
    ) -> Result<StrikePair, ResolutionError> {
        let above = self.round_to_strike(centre + points, asset)?;
        let below = self.round_to_strike(centre - points, asset)?;
        Ok(match moneyness {
            Moneyness::Otm => StrikePair {
                call: above,
                put: below,
            },
            Moneyness::Itm => StrikePair {
                call: below,
                put: above,
            },
        })
    }

    /// The ATM strike and `count` strikes each side of it, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`ResolutionError::UnsupportedAsset`] for unknown assets.
    pub fn nearest_strikes(&self, price: Decimal, asset: &str, count: u32) -> Result<Vec<Decimal>, ResolutionError> {
        let inc = self.increment(asset)?;
        let atm = self.round_to_strike(price, asset)?;
        let count = i64::from(count);
        Ok((-count..=count)
            .map(|step| (atm + inc * Decimal::from(step)).normalize())
            .filter(|s| *s > Decimal::ZERO)
            .collect())
    }
}

/// Indexes `n` listed strikes away from the strike nearest `atm`, clamped to the list.
///
/// Returns `None` when nothing is listed.
pub fn numeral_strikes(live: &[Decimal], atm: Decimal, n: u32, moneyness: Moneyness) -> Option<StrikePair> {
    let mut strikes = live.to_vec();
    strikes.sort();
    strikes.dedup();

    let centre = strikes
        .iter()
        .enumerate()
        .min_by_key(|(_, s)| (**s - atm).abs())
        .map(|(i, _)| i)?;
    let n = usize::try_from(n).unwrap_or(usize::MAX);
    let above = strikes[centre.saturating_add(n).min(strikes.len() - 1)];
    let below = strikes[centre.saturating_sub(n)];

    Some(match moneyness {
        Moneyness::Otm => StrikePair {
            call: above,
            put: below,
        },
        Moneyness::Itm => StrikePair {
            call: below,
            put: above,
        },
    })
}
