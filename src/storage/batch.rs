//! Single-or-array shapes.
//!
//! Every batch capable operation takes a [`OneOrMany`], works on a [`Batch`]
//! and folds the results back into the shape it received.

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A value that was given either on its own or as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Many(_))
    }

    /// Returns the single value, or `None` when this is an array.
    pub fn into_one(self) -> Option<T> {
        match self {
            Self::One(item) => Some(item),
            Self::Many(_) => None,
        }
    }

    /// Returns the array, or `None` when this is a single value.
    pub fn into_many(self) -> Option<Vec<T>> {
        match self {
            Self::One(_) => None,
            Self::Many(items) => Some(items),
        }
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        Self::Many(items)
    }
}

/// Items of an operation plus the shape they arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
    pub was_array: bool,
    pub items: Vec<T>,
}

impl<T> From<OneOrMany<T>> for Batch<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(item) => Self {
                was_array: false,
                items: vec![item],
            },
            OneOrMany::Many(items) => Self {
                was_array: true,
                items,
            },
        }
    }
}

impl<T> Batch<T> {
    /// Replace the items, keeping the original shape.
    #[must_use]
    pub fn with_items<U>(&self, items: Vec<U>) -> Batch<U> {
        Batch {
            was_array: self.was_array,
            items,
        }
    }

    /// Fold back into the shape the batch was created from.
    ///
    /// A non-array batch with no items (only possible when a caller emptied it)
    /// comes back as an empty array.
    pub fn into_shape(mut self) -> OneOrMany<T> {
        if self.was_array || self.items.len() != 1 {
            OneOrMany::Many(self.items)
        } else {
            OneOrMany::One(self.items.remove(0))
        }
    }
}

/// Run `op` for every item concurrently and join on all of them.
///
/// A failing item never cancels its siblings: every future runs to completion
/// and only then the first error (in input order) is reported.
pub(crate) async fn for_each_concurrent<'a, T, R, F, Fut>(items: &'a [T], op: F) -> Result<Vec<R>>
where
    F: Fn(&'a T) -> Fut,
    Fut: std::future::Future<Output = Result<R>>,
{
    join_all(items.iter().map(op)).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::Error;

    #[test]
    fn keeps_single_shape() {
        let batch = Batch::from(OneOrMany::One("a"));
        assert!(!batch.was_array);
        assert_eq!(batch.items, vec!["a"]);
        assert_eq!(batch.into_shape(), OneOrMany::One("a"));
    }

    #[test]
    fn keeps_array_shape_for_one_item() {
        let batch = Batch::from(OneOrMany::Many(vec!["a"]));
        assert!(batch.was_array);
        assert_eq!(batch.into_shape(), OneOrMany::Many(vec!["a"]));
    }

    #[test]
    fn with_items_preserves_shape_and_order() {
        let batch = Batch::from(OneOrMany::Many(vec![1, 2, 3]));
        let mapped = batch.with_items(batch.items.iter().map(|i| i * 10).collect());
        assert_eq!(mapped.into_shape(), OneOrMany::Many(vec![10, 20, 30]));
    }

    #[test]
    fn deserializes_either_shape() {
        let one: OneOrMany<String> = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(one, OneOrMany::One("a".to_string()));
        let many: OneOrMany<String> = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(many, OneOrMany::Many(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn failure_does_not_cancel_siblings() {
        let finished = Arc::new(AtomicUsize::new(0));
        let items = vec![1_u64, 2, 3];

        let res = for_each_concurrent(&items, |item| {
            let finished = finished.clone();
            async move {
                if *item == 1 {
                    return Err(Error::Message("boom".to_string()));
                }
                tokio::time::sleep(std::time::Duration::from_millis(10 * item)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(*item)
            }
        })
        .await;

        assert!(res.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn results_follow_input_order() {
        let items = vec![30_u64, 10, 20];
        let res = for_each_concurrent(&items, |item| async move {
            tokio::time::sleep(std::time::Duration::from_millis(*item)).await;
            Ok(*item)
        })
        .await
        .unwrap();
        assert_eq!(res, vec![30, 10, 20]);
    }
}
