//! Parent-before-child ordering of table subsets, for JOIN construction.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::schema::{Schema, TableMeta};

/// Orders `names` plus the root so that every table comes after its parent.
///
/// The root is always first. A table whose parent is not in the set follows
/// the root directly. Tables with no constraint between them keep their
/// declaration order. Unknown names fail with
/// [`VdbError::UnknownTable`](crate::VdbError::UnknownTable).
pub fn tsort<'s, 'n>(
    schema: &'s Schema,
    names: impl IntoIterator<Item = &'n str>,
) -> Result<Vec<&'s TableMeta>> {
    let root = schema.root();
    let mut pending: Vec<&TableMeta> = Vec::new();
    for name in names {
        let table = schema.table(name)?;
        if table.name() != root.name() && !pending.iter().any(|t| t.name() == name) {
            pending.push(table);
        }
    }
    pending.sort_by_key(|t| schema.position(t.name()));

    let in_set: BTreeSet<&str> = pending.iter().map(|t| t.name()).collect();
    let mut emitted: BTreeSet<&str> = BTreeSet::from([root.name()]);
    let mut order = vec![root];

    while !pending.is_empty() {
        let ready = pending.iter().position(|t| {
            t.parent_name().map_or(true, |p| emitted.contains(p) || !in_set.contains(p))
        });
        // The schema has no cycles, so some pending table is always ready.
        let Some(i) = ready else { break };
        let table = pending.remove(i);
        emitted.insert(table.name());
        order.push(table);
    }
    Ok(order)
}

/// `tables` plus every ancestor of each, up to and including `top`.
pub fn tables_transitive_closure<'n>(
    schema: &Schema,
    tables: impl IntoIterator<Item = &'n str>,
    top: &str,
) -> Result<BTreeSet<String>> {
    let mut closure = BTreeSet::new();
    for name in tables {
        let mut table = schema.table(name)?;
        closure.insert(table.name().to_string());
        while table.name() != top {
            let Some(parent) = schema.parent_of(table) else { break };
            closure.insert(parent.name().to_string());
            table = parent;
        }
    }
    Ok(closure)
}
