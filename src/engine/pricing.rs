//! Pricing resolver: a pure function from event/tier/session and quantity to
//! a priced line. No I/O, no side effects; all arithmetic is fixed-point
//! with two fractional digits and banker's rounding.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::money::{round2, Currency, Money, MoneyError};
use crate::models::event::Event;
use crate::models::tier::{PricingTier, Session};
use crate::utils::error::AppError;

/// Service fee is 10% of the unit price, per ticket.
const SERVICE_FEE_RATE: &str = "0.10";

#[derive(Debug, Clone, Serialize)]
pub struct PricedLine {
    pub unit_price: Money,
    pub service_fee: Money,
    pub gateway_fee: Money,
    pub total: Money,
    pub quantity: i32,
}

impl From<MoneyError> for AppError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::CurrencyMismatch(a, b) => AppError::ValidationError(format!(
                "Currency mismatch: {} vs {}",
                a, b
            )),
            other => AppError::ValidationError(other.to_string()),
        }
    }
}

/// Resolves the price of `quantity` tickets. Base price is the session
/// override if present, else the tier's, else the event's. VIP tiers price
/// at x2.0, Premium at x1.5.
pub fn resolve(
    event: &Event,
    tier: Option<&PricingTier>,
    session: Option<&Session>,
    quantity: i32,
    gateway_fee: Option<Money>,
) -> Result<PricedLine, AppError> {
    if quantity <= 0 {
        return Err(AppError::ValidationError(
            "Quantity must be greater than zero".to_string(),
        ));
    }

    let currency = Currency::new(&event.currency)?;

    let base = session
        .and_then(|s| s.base_price)
        .or_else(|| tier.map(|t| t.base_price))
        .unwrap_or(event.base_price);

    let multiplier = tier
        .map(|t| tier_multiplier(&t.name))
        .unwrap_or(Decimal::ONE);

    let unit_price = Money::new(round2(base * multiplier), currency.clone())?;
    let service_fee = Money::new(
        round2(unit_price.amount * fee_rate()),
        currency.clone(),
    )?;
    let gateway_fee = match gateway_fee {
        Some(fee) => {
            if fee.currency != currency {
                return Err(AppError::ValidationError(format!(
                    "Gateway fee currency {} does not match event currency {}",
                    fee.currency, currency
                )));
            }
            fee
        }
        None => Money::zero(currency.clone()),
    };

    let per_ticket = unit_price.checked_add(&service_fee)?;
    let total = per_ticket
        .checked_mul(i64::from(quantity))?
        .checked_add(&gateway_fee)?;

    Ok(PricedLine {
        unit_price,
        service_fee,
        gateway_fee,
        total,
        quantity,
    })
}

fn fee_rate() -> Decimal {
    Decimal::from_str_exact(SERVICE_FEE_RATE).unwrap_or(Decimal::ZERO)
}

/// VIP x2.0, Premium x1.5, everything else x1.0, matched on the tier name.
fn tier_multiplier(tier_name: &str) -> Decimal {
    let name = tier_name.to_ascii_lowercase();
    if name.contains("vip") {
        Decimal::TWO
    } else if name.contains("premium") {
        Decimal::from_str_exact("1.5").unwrap_or(Decimal::ONE)
    } else {
        Decimal::ONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::EventStatus;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn event(currency: &str, base: &str) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            organizer_id: Uuid::new_v4(),
            venue_id: None,
            title: "Show".to_string(),
            description: None,
            total_capacity: 100,
            base_price: d(base),
            currency: currency.to_string(),
            sales_open: None,
            sales_close: None,
            start_time: now + Duration::days(2),
            end_time: Some(now + Duration::days(3)),
            status: EventStatus::Published,
            is_streaming: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn tier(event_id: Uuid, name: &str, base: &str) -> PricingTier {
        let now = Utc::now();
        PricingTier {
            id: Uuid::new_v4(),
            event_id,
            name: name.to_string(),
            description: None,
            base_price: d(base),
            total_tickets: 10,
            available_tickets: 10,
            sales_open: None,
            sales_close: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_standard_tier_with_service_fee() {
        let e = event("USD", "50.00");
        let t = tier(e.id, "General", "100.00");
        let line = resolve(&e, Some(&t), None, 2, None).unwrap();
        assert_eq!(line.unit_price.amount, d("100.00"));
        assert_eq!(line.service_fee.amount, d("10.00"));
        assert_eq!(line.total.amount, d("220.00"));
        assert_eq!(line.total.currency.as_str(), "USD");
    }

    #[test]
    fn test_vip_and_premium_multipliers() {
        let e = event("USD", "50.00");
        let vip = tier(e.id, "VIP Lounge", "100.00");
        let premium = tier(e.id, "Premium", "100.00");

        let line = resolve(&e, Some(&vip), None, 1, None).unwrap();
        assert_eq!(line.unit_price.amount, d("200.00"));
        assert_eq!(line.service_fee.amount, d("20.00"));

        let line = resolve(&e, Some(&premium), None, 1, None).unwrap();
        assert_eq!(line.unit_price.amount, d("150.00"));
        assert_eq!(line.service_fee.amount, d("15.00"));
    }

    #[test]
    fn test_session_price_overrides_tier() {
        let e = event("USD", "50.00");
        let t = tier(e.id, "General", "100.00");
        let now = Utc::now();
        let s = Session {
            id: Uuid::new_v4(),
            event_id: e.id,
            name: "Matinee".to_string(),
            capacity: 50,
            available_seats: 50,
            base_price: Some(d("30.00")),
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: now,
            updated_at: now,
        };
        let line = resolve(&e, Some(&t), Some(&s), 1, None).unwrap();
        assert_eq!(line.unit_price.amount, d("30.00"));
        assert_eq!(line.service_fee.amount, d("3.00"));
    }

    #[test]
    fn test_event_base_when_no_tier() {
        let e = event("USD", "25.00");
        let line = resolve(&e, None, None, 4, None).unwrap();
        assert_eq!(line.unit_price.amount, d("25.00"));
        assert_eq!(line.total.amount, d("110.00"));
    }

    #[test]
    fn test_gateway_fee_joins_the_total() {
        let e = event("USD", "25.00");
        let fee = Money::new(d("1.50"), Currency::new("USD").unwrap()).unwrap();
        let line = resolve(&e, None, None, 1, Some(fee)).unwrap();
        assert_eq!(line.total.amount, d("29.00"));
    }

    #[test]
    fn test_gateway_fee_in_other_currency_is_rejected() {
        let e = event("USD", "25.00");
        let fee = Money::new(d("1.50"), Currency::new("KES").unwrap()).unwrap();
        assert!(resolve(&e, None, None, 1, Some(fee)).is_err());
    }

    #[test]
    fn test_service_fee_rounds_half_to_even() {
        let e = event("USD", "0.00");
        let t = tier(e.id, "General", "0.25");
        // 10% of 0.25 is 0.025, banker's rounding lands on 0.02
        let line = resolve(&e, Some(&t), None, 1, None).unwrap();
        assert_eq!(line.service_fee.amount, d("0.02"));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let e = event("USD", "25.00");
        assert!(resolve(&e, None, None, 0, None).is_err());
    }
}
