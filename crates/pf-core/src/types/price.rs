//! Price/size pairs and starting-price projections as they appear on the wire.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::json_util::parse_finite_f64;

/// `[price, size]`: one level of a price-keyed ladder (`atb`, `atl`, `trd`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSize(pub f64, pub f64);

impl PriceSize {
    #[inline]
    pub fn price(&self) -> f64 {
        self.0
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.1
    }
}

/// `[level, price, size]`: one level of a positioned ladder (`batb`, `batl`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelPriceSize(pub u32, pub f64, pub f64);

impl LevelPriceSize {
    #[inline]
    pub fn level(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn price(&self) -> f64 {
        self.1
    }

    #[inline]
    pub fn size(&self) -> f64 {
        self.2
    }
}

/// A starting-price projection (`spn` / `spf`).
///
/// The feed uses a not-a-number token when no projection can be computed.
/// That token decodes to [`Projected::Unavailable`], an explicit absence
/// rather than zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projected {
    Price(f64),
    Unavailable,
}

impl Projected {
    /// The projected price, or `None` when unavailable.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Price(p) => Some(*p),
            Self::Unavailable => None,
        }
    }
}

impl Serialize for Projected {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Price(p) => serializer.serialize_f64(*p),
            Self::Unavailable => serializer.serialize_str("NaN"),
        }
    }
}

impl<'de> Deserialize<'de> for Projected {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProjectedVisitor;

        impl Visitor<'_> for ProjectedVisitor {
            type Value = Projected;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number or a non-finite token")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Projected, E> {
                Ok(if v.is_finite() { Projected::Price(v) } else { Projected::Unavailable })
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Projected, E> {
                Ok(Projected::Price(v as f64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Projected, E> {
                Ok(Projected::Price(v as f64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Projected, E> {
                match parse_finite_f64(v) {
                    Some(p) => Ok(Projected::Price(p)),
                    None if is_non_finite_token(v) => Ok(Projected::Unavailable),
                    None => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(ProjectedVisitor)
    }
}

fn is_non_finite_token(s: &str) -> bool {
    let s = s.trim().trim_start_matches(['-', '+']);
    s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("infinity") || s.eq_ignore_ascii_case("inf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize, PartialEq)]
    struct Holder {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spn: Option<Projected>,
    }

    #[test]
    fn nan_token_is_explicit_absence_not_zero() {
        let h: Holder = serde_json::from_str(r#"{"spn":"NaN"}"#).unwrap();
        assert_eq!(h.spn, Some(Projected::Unavailable));
        assert_eq!(h.spn.and_then(|p| p.value()), None);

        let h: Holder = serde_json::from_str(r#"{"spn":"Infinity"}"#).unwrap();
        assert_eq!(h.spn, Some(Projected::Unavailable));
    }

    #[test]
    fn numbers_and_absence() {
        let h: Holder = serde_json::from_str(r#"{"spn":3.45}"#).unwrap();
        assert_eq!(h.spn, Some(Projected::Price(3.45)));
        let h: Holder = serde_json::from_str(r#"{"spn":4}"#).unwrap();
        assert_eq!(h.spn, Some(Projected::Price(4.0)));
        let h: Holder = serde_json::from_str("{}").unwrap();
        assert_eq!(h.spn, None);
        assert!(serde_json::from_str::<Holder>(r#"{"spn":"abc"}"#).is_err());
    }

    #[test]
    fn unavailable_serializes_as_token() {
        let h = Holder { spn: Some(Projected::Unavailable) };
        let s = serde_json::to_string(&h).unwrap();
        assert_eq!(s, r#"{"spn":"NaN"}"#);
        assert_eq!(serde_json::from_str::<Holder>(&s).unwrap(), h);
    }

    #[test]
    fn ladder_levels_are_arrays() {
        let l: LevelPriceSize = serde_json::from_str("[0,1.98,120.5]").unwrap();
        assert_eq!(l.level(), 0);
        assert_eq!(l.price(), 1.98);
        assert_eq!(l.size(), 120.5);
        let p: PriceSize = serde_json::from_str("[2.5,10]").unwrap();
        assert_eq!((p.price(), p.size()), (2.5, 10.0));
    }
}
