use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// A validated Kubernetes resource quantity (e.g. `500m`, `256Mi`, `1e3`).
///
/// The original text is preserved so that the value sent to the API server
/// is exactly what the caller supplied.
#[derive(Clone, PartialEq, Eq)]
pub struct K8sQuantity {
    raw: String,
    format: Format,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Format {
    /// Powers of 1024: `Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`.
    BinarySi,
    /// Powers of 1000, including no suffix at all: `m`, `k`, `M`, `G`, `T`, `P`, `E`.
    DecimalSi,
    /// `e`/`E` followed by a signed integer.
    DecimalExponent,
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ParseError {
    #[error("quantity must not be empty")]
    Empty,

    #[error("invalid number: {0:?}")]
    InvalidNumber(String),

    #[error("invalid suffix {0:?}: {expected}", expected = EXPECTED_SUFFIXES)]
    InvalidSuffix(String),
}

const EXPECTED_SUFFIXES: &str =
    "expected one of 'Ki', 'Mi', 'Gi', 'Ti', 'Pi', 'Ei', 'm', 'k', 'M', 'G', 'T', 'P', 'E', or an exponent";

impl K8sQuantity {
    #[inline]
    #[must_use]
    pub fn format(&self) -> Format {
        self.format
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl From<K8sQuantity> for Quantity {
    fn from(K8sQuantity { raw, .. }: K8sQuantity) -> Self {
        Quantity(raw)
    }
}

impl fmt::Debug for K8sQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.raw, f)
    }
}

impl fmt::Display for K8sQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for K8sQuantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // implements the grammar documented in
        // https://github.com/kubernetes/apimachinery/blob/master/pkg/api/resource/quantity.go
        //
        // <quantity>      ::= <signedNumber><suffix>
        // <signedNumber>  ::= <number> | +<number> | -<number>
        // <number>        ::= <digits> | <digits>.<digits> | <digits>. | .<digits>
        // <suffix>        ::= <binarySI> | <decimalExponent> | <decimalSI>
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        let unsigned = s.strip_prefix(is_sign).unwrap_or(s);
        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);
        if !is_number(number) {
            return Err(ParseError::InvalidNumber(number.to_string()));
        }

        let format = match suffix {
            "Ki" | "Mi" | "Gi" | "Ti" | "Pi" | "Ei" => Format::BinarySi,
            "" | "m" | "k" | "M" | "G" | "T" | "P" | "E" => Format::DecimalSi,
            _ => match suffix.strip_prefix(|c: char| c == 'e' || c == 'E') {
                Some(exp) if is_integer(exp) => Format::DecimalExponent,
                _ => return Err(ParseError::InvalidSuffix(suffix.to_string())),
            },
        };

        Ok(K8sQuantity {
            raw: s.to_string(),
            format,
        })
    }
}

fn is_sign(c: char) -> bool {
    c == '+' || c == '-'
}

fn is_number(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next().unwrap_or_default();
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    all_digits(whole) && all_digits(frac) && !(whole.is_empty() && frac.is_empty())
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix(is_sign).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

impl Serialize for K8sQuantity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for K8sQuantity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;
        impl de::Visitor<'_> for Visitor {
            type Value = K8sQuantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a Kubernetes resource quantity string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value.parse::<K8sQuantity>().map_err(de::Error::custom)
            }
        }
        deserializer.deserialize_str(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_quantities() {
        let cases: &[(&str, Format)] = &[
            ("0", Format::DecimalSi),
            ("1", Format::DecimalSi),
            ("500m", Format::DecimalSi),
            ("0.5", Format::DecimalSi),
            (".5", Format::DecimalSi),
            ("5.", Format::DecimalSi),
            ("+2k", Format::DecimalSi),
            ("-1", Format::DecimalSi),
            ("2E", Format::DecimalSi),
            ("128974848", Format::DecimalSi),
            ("256Mi", Format::BinarySi),
            ("1.5Gi", Format::BinarySi),
            ("1Ei", Format::BinarySi),
            ("129e6", Format::DecimalExponent),
            ("1E3", Format::DecimalExponent),
            ("1e-3", Format::DecimalExponent),
            ("1e+3", Format::DecimalExponent),
        ];

        for (input, format) in cases {
            let q = input
                .parse::<K8sQuantity>()
                .unwrap_or_else(|e| panic!("{input:?} must parse: {e}"));
            assert_eq!(q.format(), *format, "{input:?}");
            assert_eq!(q.as_str(), *input);
        }
    }

    #[test]
    fn rejects_invalid_quantities() {
        let cases: &[(&str, ParseError)] = &[
            ("", ParseError::Empty),
            ("bad-value", ParseError::InvalidNumber(String::new())),
            ("Mi", ParseError::InvalidNumber(String::new())),
            (".", ParseError::InvalidNumber(".".to_string())),
            ("1.2.3", ParseError::InvalidNumber("1.2.3".to_string())),
            (" 1", ParseError::InvalidNumber(String::new())),
            ("--1", ParseError::InvalidNumber(String::new())),
            ("1 ", ParseError::InvalidSuffix(" ".to_string())),
            ("256MB", ParseError::InvalidSuffix("MB".to_string())),
            ("1mi", ParseError::InvalidSuffix("mi".to_string())),
            ("1Ki3", ParseError::InvalidSuffix("Ki3".to_string())),
            ("1e", ParseError::InvalidSuffix("e".to_string())),
            ("1e1.5", ParseError::InvalidSuffix("e1.5".to_string())),
        ];

        for (input, err) in cases {
            assert_eq!(
                input.parse::<K8sQuantity>().as_ref(),
                Err(err),
                "{input:?} must not parse"
            );
        }
    }

    #[test]
    fn converts_to_api_quantity() {
        let q = "250m".parse::<K8sQuantity>().unwrap();
        assert_eq!(Quantity::from(q), Quantity("250m".to_string()));
    }

    #[test]
    fn deserializes_from_json() {
        let q: K8sQuantity = serde_json::from_str(r#""64Mi""#).unwrap();
        assert_eq!(q.to_string(), "64Mi");

        serde_json::from_str::<K8sQuantity>(r#""lots""#).expect_err("must reject invalid quantity");
    }
}
