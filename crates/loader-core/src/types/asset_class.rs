//! 자산군 정의.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 카탈로그가 구분하는 자산군.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetClass {
    /// 주식
    Share,
    /// 선물
    Future,
    /// 지표성 상품 (지수, 환율 등)
    Indicative,
}

impl AssetClass {
    pub const ALL: [AssetClass; 3] = [AssetClass::Share, AssetClass::Future, AssetClass::Indicative];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Share => "SHARES",
            AssetClass::Future => "FUTURES",
            AssetClass::Indicative => "INDICATIVES",
        }
    }

    /// 비어 있으면 모든 자산군으로 확장합니다. 중복은 제거됩니다.
    pub fn or_all(classes: &[AssetClass]) -> Vec<AssetClass> {
        if classes.is_empty() {
            return Self::ALL.to_vec();
        }
        let mut resolved = Vec::with_capacity(classes.len());
        for class in classes {
            if !resolved.contains(class) {
                resolved.push(*class);
            }
        }
        resolved
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SHARE" | "SHARES" => Ok(AssetClass::Share),
            "FUTURE" | "FUTURES" => Ok(AssetClass::Future),
            "INDICATIVE" | "INDICATIVES" => Ok(AssetClass::Indicative),
            _ => Err(format!("알 수 없는 자산군: {}", s)),
        }
    }
}
