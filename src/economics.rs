//! Token economics: stake pricing, royalty splits and reward shares.
//!
//! These are the pure arithmetic pieces behind the stake ledger and the
//! rewards ledger.  Everything is integer math on wei amounts so that every
//! participant evaluating the same state reaches identical numbers.

/// Token amount in wei.
pub type Amount = u128;

/// One ether expressed in wei.
pub const ETHER: Amount = 1_000_000_000_000_000_000;

/// Length of one stake-decay window in seconds (7 days).
pub const WEEK_SECS: u64 = 604_800;

/// Computes `value * numerator / denominator` without intermediate overflow
/// for the magnitudes the ledger handles. Returns zero when `denominator` is zero.
pub fn mul_div(value: Amount, numerator: Amount, denominator: Amount) -> Amount {
    if denominator == 0 {
        return 0;
    }
    match value.checked_mul(numerator) {
        Some(product) => product / denominator,
        None if value >= denominator => {
            let whole = (value / denominator).saturating_mul(numerator);
            let rest = mul_div(value % denominator, numerator, denominator);
            whole.saturating_add(rest)
        }
        None if numerator >= denominator => mul_div(numerator, value, denominator),
        None => Amount::MAX,
    }
}

/// Returns `percent`% of `amount`, rounded down.
pub fn percent_of(amount: Amount, percent: u32) -> Amount {
    mul_div(amount, Amount::from(percent), 100)
}

/// Applies the weekly decay to a stake base.
///
/// Within each 7-day window the value falls linearly to half of the window's
/// starting value; at each window boundary the starting value halves.
pub fn decayed_stake(base: Amount, elapsed: u64) -> Amount {
    let windows = elapsed / WEEK_SECS;
    if windows >= u128::BITS as u64 {
        return 0;
    }
    let start = base >> windows;
    let into_window = Amount::from(elapsed % WEEK_SECS);
    start - mul_div(start, into_window, Amount::from(2 * WEEK_SECS))
}

/// Stake a new server must bond.
///
/// `last_registration` is `(timestamp, requirement_at_that_time)` of the most
/// recent registration.  With no active servers the price resets to
/// `min_stake`; otherwise it is double the last price, decayed by the time
/// elapsed since, floored at `min_stake`.
pub fn stake_requirement(
    min_stake: Amount,
    server_count: usize,
    last_registration: Option<(u64, Amount)>,
    now: u64,
) -> Amount {
    match last_registration {
        Some((at, stake)) if server_count > 0 => {
            let base = stake.saturating_mul(2);
            decayed_stake(base, now.saturating_sub(at)).max(min_stake)
        }
        _ => min_stake,
    }
}

/// Splits a donation into `(to_treasury, royalties)`.
pub fn split_royalties(amount: Amount, royalties_percent: u32) -> (Amount, Amount) {
    let royalties = percent_of(amount, royalties_percent);
    (amount - royalties, royalties)
}

/// Reward share for `points` out of `total_points`.
///
/// Each point is worth `treasury / total_points`, capped at `point_cap`.
pub fn reward_share(treasury: Amount, points: u64, total_points: u64, point_cap: Amount) -> Amount {
    if total_points == 0 || points == 0 {
        return 0;
    }
    let total = Amount::from(total_points);
    let points = Amount::from(points);
    if treasury <= point_cap.saturating_mul(total) {
        mul_div(treasury, points, total)
    } else {
        point_cap.saturating_mul(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stake_decays_linearly_then_halves_weekly() {
        let base = 16 * ETHER;
        let mut elapsed = 0u64;
        assert_eq!(decayed_stake(base, elapsed), 16 * ETHER);
        elapsed += 120_960;
        assert_eq!(decayed_stake(base, elapsed), 144 * ETHER / 10);
        elapsed += 181_440;
        assert_eq!(decayed_stake(base, elapsed), 12 * ETHER);
        let expected = [8, 6, 4, 3, 2];
        for want in expected {
            elapsed += 302_400;
            assert_eq!(decayed_stake(base, elapsed), want * ETHER);
        }
        elapsed += 302_400;
        assert_eq!(decayed_stake(base, elapsed), 15 * ETHER / 10);
        elapsed += 302_400;
        assert_eq!(decayed_stake(base, elapsed), ETHER);
    }

    #[test]
    fn requirement_floors_at_min_stake_and_resets_when_empty() {
        let last = Some((0, 8 * ETHER));
        assert_eq!(stake_requirement(ETHER, 4, last, 0), 16 * ETHER);
        assert_eq!(stake_requirement(ETHER, 4, last, 40 * WEEK_SECS), ETHER);
        assert_eq!(stake_requirement(ETHER, 4, last, 500 * WEEK_SECS), ETHER);
        assert_eq!(stake_requirement(ETHER, 0, last, 0), ETHER);
        assert_eq!(stake_requirement(ETHER, 0, None, 0), ETHER);
    }

    #[test]
    fn royalties_split_rounds_toward_treasury_remainder() {
        assert_eq!(split_royalties(100, 10), (90, 10));
        assert_eq!(split_royalties(99, 10), (90, 9));
        assert_eq!(split_royalties(5, 0), (5, 0));
        assert_eq!(split_royalties(5, 100), (0, 5));
    }

    #[test]
    fn reward_share_is_proportional_below_the_cap() {
        let cap = 100 * ETHER;
        assert_eq!(reward_share(400 * ETHER, 3, 20, cap), 60 * ETHER);
        assert_eq!(reward_share(340 * ETHER, 12, 17, cap), 240 * ETHER);
        assert_eq!(reward_share(100 * ETHER, 5, 5, cap), 100 * ETHER);
        assert_eq!(reward_share(100 * ETHER, 0, 5, cap), 0);
        assert_eq!(reward_share(100 * ETHER, 5, 0, cap), 0);
    }

    #[test]
    fn reward_share_caps_point_value() {
        assert_eq!(reward_share(100 * ETHER, 5, 6, ETHER), 5 * ETHER);
    }

    #[test]
    fn mul_div_survives_large_products() {
        let big = u128::MAX / 3;
        assert_eq!(mul_div(big, 3, 3), big);
        assert_eq!(mul_div(u128::MAX, 4, 8), u128::MAX / 2);
        assert_eq!(mul_div(10, 7, 0), 0);
    }
}
