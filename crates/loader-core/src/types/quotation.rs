//! 정수부/나노 단위로 전달되는 가격 표현.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 가격의 소수 자릿수.
pub const PRICE_SCALE: u32 = 9;

const NANO_PER_UNIT: i64 = 1_000_000_000;

/// `units + nano / 10^9` 형태의 가격.
///
/// 음수 가격은 두 필드가 모두 음수입니다 (예: -1.5 = {-1, -500000000}).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quotation {
    pub units: i64,
    pub nano: i32,
}

impl Quotation {
    pub fn new(units: i64, nano: i32) -> Self {
        Self { units, nano }
    }

    /// 소수 9자리 Decimal로 변환합니다.
    pub fn to_decimal(&self) -> Decimal {
        let mut value = Decimal::from(self.units) + Decimal::new(i64::from(self.nano), PRICE_SCALE);
        value.rescale(PRICE_SCALE);
        value
    }

    /// Decimal에서 변환합니다. 10^-9 미만은 버립니다.
    pub fn from_decimal(value: Decimal) -> Self {
        let truncated = value.trunc();
        let units = i64::try_from(truncated).unwrap_or(0);
        let nano = ((value - truncated) * Decimal::from(NANO_PER_UNIT)).trunc();
        Self {
            units,
            nano: i32::try_from(nano).unwrap_or(0),
        }
    }
}
