//! Partitioned map-reduce over in-memory sequences: grouping by key, filtering and mapping.
//!
//! The input is cut into contiguous partitions, each worker reduces its own partition into a
//! local result, and the calling thread alone merges the local results in partition order.

use crate::{config::Config, error::Result, split};
use log::debug;
use std::{
    collections::{hash_map, BTreeMap, HashMap},
    hash::Hash,
    time::Instant,
};
use threadpool::ThreadPool;

/// Sample payload row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub name: String,
    pub age: u32,
    pub address: String,
}

impl Record {
    pub fn new(name: impl Into<String>, age: u32, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            age,
            address: address.into(),
        }
    }

    /// The six sample rows the demos are built from.
    pub fn samples() -> Vec<Record> {
        vec![
            Record::new("Jack", 21, "NewYork"),
            Record::new("Jime", 26, "China"),
            Record::new("Tina", 29, "ShangHai"),
            Record::new("Luo", 30, "Beijing"),
            Record::new("Wang", 60, "Guangdong"),
            Record::new("Feng", 25, "YunNan"),
        ]
    }
}

/// Values grouped by key. Within a key, values keep their input order.
#[derive(Debug, Clone)]
pub struct Grouping<K, V> {
    groups: HashMap<K, Vec<V>>,
}

impl<K, V> Default for Grouping<K, V> {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: PartialEq> PartialEq for Grouping<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.groups == other.groups
    }
}

impl<K: Eq + Hash, V: Eq> Eq for Grouping<K, V> {}

impl<K, V> Grouping<K, V> {
    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.groups.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &[V])> {
        self.groups.iter().map(|(k, vs)| (k, vs.as_slice()))
    }

    /// Group sizes, ordered by key.
    pub fn counts(&self) -> BTreeMap<K, usize>
    where
        K: Ord + Clone,
    {
        self.groups.iter().map(|(k, vs)| (k.clone(), vs.len())).collect()
    }

    pub fn into_inner(self) -> HashMap<K, Vec<V>> {
        self.groups
    }
}

impl<K: Eq + Hash, V> Grouping<K, V> {
    pub fn get(&self, key: &K) -> Option<&[V]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    fn merge(&mut self, local: HashMap<K, Vec<V>>) {
        for (key, mut values) in local {
            match self.groups.entry(key) {
                hash_map::Entry::Occupied(mut e) => e.get_mut().append(&mut values),
                hash_map::Entry::Vacant(e) => {
                    e.insert(values);
                }
            }
        }
    }
}

impl<K, V> IntoIterator for Grouping<K, V> {
    type Item = (K, Vec<V>);
    type IntoIter = hash_map::IntoIter<K, Vec<V>>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.into_iter()
    }
}

fn group_local<K, V, F>(part: Vec<V>, key_fn: &F) -> HashMap<K, Vec<V>>
where
    K: Eq + Hash,
    F: Fn(&V) -> K,
{
    let mut local = HashMap::<K, Vec<V>>::new();
    for value in part {
        local.entry(key_fn(&value)).or_default().push(value);
    }
    local
}

pub struct GroupingEngine {
    pool: ThreadPool,
    partitions: usize,
    threshold: usize,
}

impl GroupingEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            pool: split::build_pool(config, "group"),
            partitions: config.partitions.max(1),
            threshold: config.parallelism_threshold,
        }
    }

    /// Groups `values` by `key_fn` using the configured number of partitions.
    pub fn group_by<K, V, F>(&self, values: Vec<V>, key_fn: F) -> Result<Grouping<K, V>>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        self.group_by_with(values, key_fn, self.partitions)
    }

    pub fn group_by_with<K, V, F>(
        &self,
        values: Vec<V>,
        key_fn: F,
        partitions: usize,
    ) -> Result<Grouping<K, V>>
    where
        K: Eq + Hash + Send + 'static,
        V: Send + 'static,
        F: Fn(&V) -> K + Send + Sync + 'static,
    {
        let started = Instant::now();
        let total = values.len();
        let locals = split::split_map(&self.pool, values, partitions, self.threshold, move |part| {
            group_local(part, &key_fn)
        })?;

        let n_locals = locals.len();
        let mut grouping = Grouping::default();
        for local in locals {
            grouping.merge(local);
        }

        debug!(
            "grouped {} values into {} keys over {} partitions in {:?}",
            total,
            grouping.len(),
            n_locals,
            started.elapsed(),
        );
        Ok(grouping)
    }

    /// Keeps the values matching `predicate`, in input order.
    pub fn filter<V, P>(&self, values: Vec<V>, predicate: P) -> Result<Vec<V>>
    where
        V: Send + 'static,
        P: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let keep = move |part: Vec<V>| {
            part.into_iter().filter(|v| predicate(v)).collect::<Vec<_>>()
        };
        let parts = split::split_map(&self.pool, values, self.partitions, self.threshold, keep)?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Applies `f` to every value, in input order.
    pub fn map<T, R, F>(&self, values: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let apply = move |part: Vec<T>| part.into_iter().map(&f).collect::<Vec<_>>();
        let parts = split::split_map(&self.pool, values, self.partitions, self.threshold, apply)?;
        Ok(parts.into_iter().flatten().collect())
    }
}
