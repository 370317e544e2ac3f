use anyhow::{Result, anyhow, bail};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// A resource amount stored in milli-units.
///
/// Parses the usual quantity suffixes: `m`, decimal (`k`, `M`, `G`, `T`, `P`, `E`)
/// and binary (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`). Fractions are rounded up
/// to the next milli-unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn from_units(units: i64) -> Self {
        Quantity(units * 1000)
    }

    pub fn from_millis(millis: i64) -> Self {
        Quantity(millis)
    }

    pub fn millis(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

fn suffix_multiplier(suffix: &str) -> Option<i128> {
    let m = match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000 * 1_000,
        "M" => 1_000 * 1_000_000,
        "G" => 1_000 * 1_000_000_000,
        "T" => 1_000 * 1_000_000_000_000,
        "P" => 1_000 * 1_000_000_000_000_000,
        "E" => 1_000 * 1_000_000_000_000_000_000,
        "Ki" => 1_000 << 10,
        "Mi" => 1_000 << 20,
        "Gi" => 1_000 << 30,
        "Ti" => 1_000 << 40,
        "Pi" => 1_000 << 50,
        "Ei" => 1_000 << 60,
        _ => return None,
    };
    Some(m)
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            bail!("quantity must not be empty");
        }
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let split = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(split);
        let multiplier =
            suffix_multiplier(suffix).ok_or_else(|| anyhow!("unknown quantity suffix in '{}'", s))?;

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            bail!("quantity '{}' has no digits", s);
        }
        if frac_part.contains('.') {
            bail!("quantity '{}' has more than one decimal point", s);
        }
        if frac_part.len() > 18 {
            bail!("quantity '{}' has too many fractional digits", s);
        }

        let digits: i128 = format!("{}{}", int_part, frac_part)
            .parse()
            .map_err(|e| anyhow!("invalid quantity '{}': {}", s, e))?;
        let scale = 10i128.pow(frac_part.len() as u32);
        let scaled = digits
            .checked_mul(multiplier)
            .ok_or_else(|| anyhow!("quantity '{}' overflows", s))?;
        // round up to the next milli-unit
        let millis = (scaled + scale - 1) / scale;
        let millis = i64::try_from(millis).map_err(|_| anyhow!("quantity '{}' overflows", s))?;
        Ok(Quantity(if negative { -millis } else { millis }))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Add for Quantity {
    type Output = Quantity;
    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Quantity {
    type Output = Quantity;
    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Quantity) {
        *self = *self + rhs;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Quantity) {
        *self = *self - rhs;
    }
}

impl Neg for Quantity {
    type Output = Quantity;
    fn neg(self) -> Quantity {
        Quantity(-self.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl Visitor<'_> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a quantity string such as \"500m\" or \"2Gi\", or an integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Quantity, E> {
        v.parse().map_err(|e: anyhow::Error| E::custom(e.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Quantity, E> {
        v.checked_mul(1000)
            .map(Quantity)
            .ok_or_else(|| E::custom("quantity overflows"))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Quantity, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(1000))
            .map(Quantity)
            .ok_or_else(|| E::custom("quantity overflows"))
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

// --- ResourceList ---

/// Resource name → quantity, e.g. `{"pods": 10, "cpu": "4", "memory": "8Gi"}`.
///
/// Arithmetic treats a missing entry as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceList(BTreeMap<String, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from `(name, quantity)` string pairs.
    pub fn parse(pairs: &[(&str, &str)]) -> Result<Self> {
        let mut list = ResourceList::new();
        for (name, value) in pairs {
            list.insert(*name, value.parse()?);
        }
        Ok(list)
    }

    pub fn insert(&mut self, name: impl Into<String>, quantity: Quantity) {
        self.0.insert(name.into(), quantity);
    }

    pub fn get(&self, name: &str) -> Option<Quantity> {
        self.0.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Entry-wise sum over the union of names.
    pub fn plus(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (name, q) in other.iter() {
            *out.0.entry(name.to_string()).or_default() += q;
        }
        out
    }

    /// Entry-wise difference over the union of names.
    pub fn minus(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        for (name, q) in other.iter() {
            *out.0.entry(name.to_string()).or_default() -= q;
        }
        out
    }

    /// Names whose quantity here exceeds the same entry in `limit`
    /// (a name absent from `limit` counts as zero).
    pub fn exceeding(&self, limit: &ResourceList) -> Vec<String> {
        self.iter()
            .filter(|(name, q)| *q > limit.get(name).unwrap_or_default())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    pub fn fits_within(&self, limit: &ResourceList) -> bool {
        self.exceeding(limit).is_empty()
    }

    /// Names carrying a negative quantity.
    pub fn negative_names(&self) -> Vec<String> {
        self.iter()
            .filter(|(_, q)| q.is_negative())
            .map(|(name, _)| name.to_string())
            .collect()
    }

    /// Names present in `other` but missing here.
    pub fn missing_names(&self, other: &ResourceList) -> Vec<String> {
        other
            .names()
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect()
    }

    /// Compares two lists treating absent entries as zero.
    pub fn same_amounts(&self, other: &ResourceList) -> bool {
        self.minus(other).iter().all(|(_, q)| q.is_zero())
    }

    /// Restricts the list to the names present in `names`.
    pub fn restricted_to(&self, names: &ResourceList) -> ResourceList {
        self.iter()
            .filter(|(name, _)| names.contains(name))
            .map(|(name, q)| (name.to_string(), q))
            .collect()
    }
}

impl FromIterator<(String, Quantity)> for ResourceList {
    fn from_iter<I: IntoIterator<Item = (String, Quantity)>>(iter: I) -> Self {
        ResourceList(iter.into_iter().collect())
    }
}

impl<'a> std::iter::Sum<&'a ResourceList> for ResourceList {
    fn sum<I: Iterator<Item = &'a ResourceList>>(iter: I) -> Self {
        iter.fold(ResourceList::new(), |acc, r| acc.plus(r))
    }
}

impl fmt::Display for ResourceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_and_milli() {
        assert_eq!("10".parse::<Quantity>().unwrap(), Quantity::from_units(10));
        assert_eq!("500m".parse::<Quantity>().unwrap(), Quantity::from_millis(500));
        assert_eq!("1.5".parse::<Quantity>().unwrap(), Quantity::from_millis(1500));
        assert_eq!("-2".parse::<Quantity>().unwrap(), Quantity::from_units(-2));
    }

    #[test]
    fn parse_suffixes() {
        assert_eq!(
            "2Gi".parse::<Quantity>().unwrap(),
            Quantity::from_units(2 * 1024 * 1024 * 1024)
        );
        assert_eq!("3k".parse::<Quantity>().unwrap(), Quantity::from_units(3000));
        assert_eq!(
            "1.5Ki".parse::<Quantity>().unwrap(),
            Quantity::from_units(1536)
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<Quantity>().is_err());
        assert!("abc".parse::<Quantity>().is_err());
        assert!("10Zi".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
    }

    #[test]
    fn display_prefers_whole_units() {
        assert_eq!(Quantity::from_units(7).to_string(), "7");
        assert_eq!(Quantity::from_millis(250).to_string(), "250m");
    }

    #[test]
    fn serde_accepts_strings_and_integers() {
        let list: ResourceList =
            serde_json::from_str(r#"{"pods": 10, "cpu": "500m"}"#).unwrap();
        assert_eq!(list.get("pods"), Some(Quantity::from_units(10)));
        assert_eq!(list.get("cpu"), Some(Quantity::from_millis(500)));
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(json, r#"{"cpu":"500m","pods":"10"}"#);
    }

    #[test]
    fn arithmetic_over_union_of_names() {
        let a = ResourceList::parse(&[("pods", "10"), ("cpu", "2")]).unwrap();
        let b = ResourceList::parse(&[("pods", "4"), ("memory", "1Gi")]).unwrap();
        let sum = a.plus(&b);
        assert_eq!(sum.get("pods"), Some(Quantity::from_units(14)));
        assert!(sum.contains("memory"));
        let diff = a.minus(&b);
        assert_eq!(diff.get("pods"), Some(Quantity::from_units(6)));
        assert!(diff.get("memory").unwrap().is_negative());
        assert_eq!(diff.negative_names(), vec!["memory".to_string()]);
    }

    #[test]
    fn exceeding_treats_missing_limit_as_zero() {
        let want = ResourceList::parse(&[("pods", "5"), ("cpu", "1")]).unwrap();
        let limit = ResourceList::parse(&[("pods", "5")]).unwrap();
        assert_eq!(want.exceeding(&limit), vec!["cpu".to_string()]);
        assert!(ResourceList::parse(&[("pods", "5")]).unwrap().fits_within(&limit));
    }

    #[test]
    fn same_amounts_ignores_zero_entries() {
        let a = ResourceList::parse(&[("pods", "0")]).unwrap();
        assert!(a.same_amounts(&ResourceList::new()));
        let b = ResourceList::parse(&[("pods", "1")]).unwrap();
        assert!(!b.same_amounts(&ResourceList::new()));
    }
}
