//! `table.column` / `table.*` column specifications.

use crate::error::{Result, VdbError};
use crate::schema::{Schema, TableMeta};
use crate::sql::Projection;

/// Requested columns grouped by table, in schema declaration order.
#[derive(Debug, Clone)]
pub struct Selection<'s> {
    projections: Vec<Projection<'s>>,
}

impl<'s> Selection<'s> {
    /// Every column of every table.
    pub fn everything(schema: &'s Schema) -> Self {
        Self { projections: schema.tables().iter().map(Projection::all).collect() }
    }

    /// Parses `specs`; each is `table.column` or `table.*`.
    pub fn parse<S: AsRef<str>>(schema: &'s Schema, specs: &[S]) -> Result<Self> {
        let mut projections: Vec<Projection<'s>> = Vec::new();
        for spec in specs {
            let spec = spec.as_ref();
            let (table_name, column) = spec
                .split_once('.')
                .filter(|(t, c)| !t.is_empty() && !c.is_empty() && !c.contains('.'))
                .ok_or_else(|| VdbError::ColumnSpec(spec.to_string()))?;
            let table = schema.table(table_name)?;

            let index = match projections.iter().position(|p| p.table().name() == table_name) {
                Some(i) => i,
                None => {
                    projections.push(Projection::new(table));
                    projections.len() - 1
                }
            };
            if column == "*" {
                projections[index] = Projection::all(table);
            } else {
                projections[index].add(column)?;
            }
        }
        projections.sort_by_key(|p| schema.position(p.table().name()));
        Ok(Self { projections })
    }

    /// `specs` when given, otherwise [`everything`](Self::everything).
    pub fn from_option<S: AsRef<str>>(schema: &'s Schema, specs: Option<&[S]>) -> Result<Self> {
        match specs {
            Some(specs) => Self::parse(schema, specs),
            None => Ok(Self::everything(schema)),
        }
    }

    pub fn projections(&self) -> &[Projection<'s>] {
        &self.projections
    }

    pub fn tables(&self) -> impl Iterator<Item = &'s TableMeta> + '_ {
        self.projections.iter().map(Projection::table)
    }

    pub fn get(&self, table: &str) -> Option<&Projection<'s>> {
        self.projections.iter().find(|p| p.table().name() == table)
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }
}
