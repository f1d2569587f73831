// SPDX-License-Identifier: Apache-2.0
//! Structural shape check of an untrusted value against a schema template.
//!
//! Used defensively on externally-loaded documents before the defaulting
//! merge trusts them. The check is structural only: it compares JSON kinds,
//! not values, and arrays are checked element-wise against the schema's
//! first element rather than as a whole.

use serde_json::Value;

/// How strictly [`validate_shape`] treats nulls and object key sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMode {
    /// Nulls are accepted anywhere, objects may omit schema keys (a later
    /// merge backfills them) and may carry extra keys.
    Lenient,
    /// Null only matches a null schema, and object key sets must match the
    /// schema's exactly, at every nesting level.
    Strict,
}

/// Check whether `data` structurally matches `schema`.
///
/// Primitive values match when their JSON kind equals the schema's kind
/// (booleans against booleans, numbers against numbers, strings against
/// strings). Arrays match an array schema when the data is empty or its
/// first element matches the schema's first element. Objects are checked
/// key-by-key against the schema's keys, with key-set equality additionally
/// required in [`ShapeMode::Strict`].
pub fn validate_shape(data: &Value, schema: &Value, mode: ShapeMode) -> bool {
    match (data, schema) {
        (Value::Null, _) => mode == ShapeMode::Lenient || schema.is_null(),
        (Value::Bool(_), Value::Bool(_))
        | (Value::Number(_), Value::Number(_))
        | (Value::String(_), Value::String(_)) => true,
        (Value::Array(items), Value::Array(template)) => match (items.first(), template.first()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(item), Some(element)) => validate_shape(item, element, mode),
        },
        (Value::Object(fields), Value::Object(template)) => {
            if mode == ShapeMode::Strict
                && (fields.len() != template.len()
                    || fields.keys().any(|key| !template.contains_key(key)))
            {
                return false;
            }
            template.iter().all(|(key, expected)| match fields.get(key) {
                Some(field) => validate_shape(field, expected, mode),
                // Absent keys are the merge's job to backfill.
                None => mode == ShapeMode::Lenient,
            })
        }
        _ => false,
    }
}
