//! Materialized query results.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::CustomDbRow;

/// Everything a `query` call produced: one [`ResultSet`] per recordset, in order.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub recordsets: Vec<ResultSet>,
}

impl QueryResult {
    /// The first recordset, which is the only one for a plain `SELECT`.
    #[must_use]
    pub fn recordset(&self) -> Option<&ResultSet> {
        self.recordsets.first()
    }

    /// Rows of the first recordset, or nothing.
    #[must_use]
    pub fn rows(&self) -> &[CustomDbRow] {
        self.recordset().map_or(&[], |rs| rs.results.as_slice())
    }
}
