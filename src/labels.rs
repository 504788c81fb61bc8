//! Label table.
//!
//! Maps addresses to one or more names. Names are minted from a single
//! monotonic counter (`LABEL_0`, `LABEL_1`, ...) and carry a reference
//! count so speculative references can be released again when a pointer
//! table is shortened.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of generated label names.
pub const LABEL_PREFIX: &str = "LABEL_";

/// Address to name mapping with alias lists and reference counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelTable {
    /// Aliases per address, in insertion order
    by_address: BTreeMap<u32, Vec<String>>,
    /// References held on each name
    refs: BTreeMap<String, usize>,
    /// Index of the next generated name
    next_index: usize,
}

impl LabelTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&mut self) -> String {
        let name = format!("{}{}", LABEL_PREFIX, self.next_index);
        self.next_index += 1;
        name
    }

    /// Always mint a fresh alias at `address`.
    ///
    /// Entrypoints use this so each entry slot owns a distinct name even
    /// when two of them share a destination.
    pub fn add_unique(&mut self, address: u32) -> String {
        let name = self.mint();
        self.by_address
            .entry(address)
            .or_default()
            .push(name.clone());
        self.refs.insert(name.clone(), 1);
        name
    }

    /// Reference the label at `address`, minting one if there is none.
    ///
    /// Repeated calls for the same address return the same name.
    pub fn add(&mut self, address: u32) -> String {
        if let Some(name) = self.name_at(address).map(str::to_string) {
            *self.refs.entry(name.clone()).or_insert(0) += 1;
            return name;
        }
        self.add_unique(address)
    }

    /// Bind an explicit name at `address` and return the address's primary name.
    ///
    /// Names that already exist elsewhere are left untouched.
    pub fn add_named(&mut self, address: u32, name: &str) -> String {
        if self.address_of(name).is_none() {
            self.by_address
                .entry(address)
                .or_default()
                .push(name.to_string());
        }
        *self.refs.entry(name.to_string()).or_insert(0) += 1;
        self.name_at(address).unwrap_or(name).to_string()
    }

    /// Drop one reference to `name`, removing the label when none remain.
    ///
    /// Returns `true` if the label was removed.
    pub fn release(&mut self, name: &str) -> bool {
        let remaining = match self.refs.get_mut(name) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return false,
        };

        if remaining > 0 {
            return false;
        }

        self.refs.remove(name);
        if let Some(address) = self.address_of(name) {
            if let Some(names) = self.by_address.get_mut(&address) {
                names.retain(|n| n != name);
                if names.is_empty() {
                    self.by_address.remove(&address);
                }
            }
        }
        true
    }

    /// First address, in ascending order, that carries `name`.
    pub fn address_of(&self, name: &str) -> Option<u32> {
        self.by_address
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == name))
            .map(|(address, _)| *address)
    }

    /// Primary (first inserted) name at `address`.
    pub fn name_at(&self, address: u32) -> Option<&str> {
        self.by_address
            .get(&address)
            .and_then(|names| names.first())
            .map(String::as_str)
    }

    /// All aliases at `address`.
    pub fn names_at(&self, address: u32) -> &[String] {
        self.by_address
            .get(&address)
            .map_or(&[], |names| names.as_slice())
    }

    /// Whether any label points at `address`.
    pub fn contains_address(&self, address: u32) -> bool {
        self.by_address.contains_key(&address)
    }

    /// Current reference count of `name`.
    pub fn ref_count(&self, name: &str) -> usize {
        self.refs.get(name).copied().unwrap_or(0)
    }

    /// Labelled addresses in ascending order with their aliases.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[String])> {
        self.by_address
            .iter()
            .map(|(address, names)| (*address, names.as_slice()))
    }

    /// Number of labelled addresses.
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    /// Whether no address is labelled.
    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}
