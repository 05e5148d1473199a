//! Attribute merging.
//!
//! Collapses attribute layers, listed from least to most specific, into one
//! effective mapping. For every key the value from the last layer defining it
//! wins. Callers supply layers in precedence order:
//!
//! ```text
//! global < network < instance < type (global, network) < device (global, network) < mac (global, network)
//! ```

use std::collections::BTreeMap;

/// Merges `layers` with last-writer-wins-per-key precedence.
///
/// Empty layers contribute no keys; merging zero layers yields an empty map.
///
/// ```
/// use netdhcp::{Attr, merge};
///
/// let global = Attr::from([("lease-time".to_string(), "3600".to_string())]);
/// let network = Attr::from([
///     ("lease-time".to_string(), "7200".to_string()),
///     ("dns".to_string(), "8.8.8.8".to_string()),
/// ]);
///
/// let effective = merge([&global, &network]);
/// assert_eq!(effective["lease-time"], "7200");
/// assert_eq!(effective["dns"], "8.8.8.8");
/// ```
pub fn merge<'a, K, V, I>(layers: I) -> BTreeMap<K, V>
where
    K: Ord + Clone + 'a,
    V: Clone + 'a,
    I: IntoIterator<Item = &'a BTreeMap<K, V>>,
{
    let mut effective = BTreeMap::new();
    for layer in layers {
        merge_into(&mut effective, layer);
    }
    effective
}

/// Applies one more specific layer on top of `base` in place.
pub fn merge_into<K, V>(base: &mut BTreeMap<K, V>, layer: &BTreeMap<K, V>)
where
    K: Ord + Clone,
    V: Clone,
{
    for (key, value) in layer {
        base.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Attr;

    fn attr(pairs: &[(&str, &str)]) -> Attr {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_zero_layers() {
        let effective: Attr = merge(std::iter::empty::<&Attr>());
        assert!(effective.is_empty());
    }

    #[test]
    fn test_single_layer_is_identity() {
        let layer = attr(&[("dns", "8.8.8.8"), ("lease-time", "60")]);
        assert_eq!(merge([&layer]), layer);
    }

    #[test]
    fn test_network_overrides_global() {
        let global = attr(&[("lease-time", "3600")]);
        let network = attr(&[("lease-time", "7200"), ("dns", "8.8.8.8")]);
        assert_eq!(
            merge([&global, &network]),
            attr(&[("lease-time", "7200"), ("dns", "8.8.8.8")])
        );
    }

    #[test]
    fn test_mac_override_on_top() {
        let base = attr(&[("lease-time", "7200"), ("dns", "8.8.8.8")]);
        let mac = attr(&[("lease-time", "60")]);
        assert_eq!(
            merge([&base, &mac]),
            attr(&[("lease-time", "60"), ("dns", "8.8.8.8")])
        );
    }

    #[test]
    fn test_empty_layers_contribute_nothing() {
        let global = attr(&[("router", "10.0.0.1")]);
        let empty = Attr::new();
        assert_eq!(merge([&empty, &global, &empty]), global);
    }

    #[test]
    fn test_order_matters() {
        let a = attr(&[("k", "a")]);
        let b = attr(&[("k", "b")]);
        assert_eq!(merge([&a, &b])["k"], "b");
        assert_eq!(merge([&b, &a])["k"], "a");
    }

    #[test]
    fn test_generic_values() {
        let low = BTreeMap::from([(1u8, 10i64), (2, 20)]);
        let high = BTreeMap::from([(2u8, -1i64)]);
        assert_eq!(merge([&low, &high]), BTreeMap::from([(1, 10), (2, -1)]));
    }
}
