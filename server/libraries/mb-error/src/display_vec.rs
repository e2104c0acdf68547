//
// Copyright 2025 Tabs Data Inc.
//

use itertools::Itertools;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;

/// A wrapper around `Vec<T>` that implements `Display` and `Debug` so inner types
/// are printed with `Display`, joined with commas.
///
/// Error variants carrying a list of messages (validation errors, duplicate value
/// reports) use it to render readable payloads.
pub struct DisplayVec<T>(Vec<T>);

impl<T> DisplayVec<T> {
    pub fn new(vec: Vec<T>) -> Self {
        Self(vec)
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T> From<Vec<T>> for DisplayVec<T> {
    fn from(vec: Vec<T>) -> Self {
        Self(vec)
    }
}

impl<T> Deref for DisplayVec<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: Display> Debug for DisplayVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

impl<T: Display> Display for DisplayVec<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.iter().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_with_commas() {
        let vec = DisplayVec::new(vec!["email: required", "age: not an integer"]);
        assert_eq!(format!("{vec}"), "email: required, age: not an integer");
        assert_eq!(format!("{vec:?}"), "email: required, age: not an integer");
    }

    #[test]
    fn test_deref_and_into_inner() {
        let vec = DisplayVec::from(vec![1, 2, 3]);
        assert_eq!(vec.len(), 3);
        assert_eq!(vec.into_inner(), vec![1, 2, 3]);
    }
}
