//! Named database functions, procedures and report fillers
//!
//! Operations run on the physical connection of the calling
//! [`LocalEntityConnection`](crate::LocalEntityConnection), inside its
//! current transaction.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dalmux_core::{Error, Result, Value};
use rusqlite::Connection;

/// A function returning a value.
pub trait DatabaseFunction: Send + Sync {
    fn execute(&self, connection: &Connection, arguments: &[Value]) -> Result<Value>;
}

/// A procedure run for its side effects.
pub trait DatabaseProcedure: Send + Sync {
    fn execute(&self, connection: &Connection, arguments: &[Value]) -> Result<()>;
}

/// Fills a named report from the live connection; the result is the filled
/// report in whatever value form the report collaborator produces.
pub trait ReportFiller: Send + Sync {
    fn fill(&self, connection: &Connection, parameters: &[Value]) -> Result<Value>;
}

impl<F> DatabaseFunction for F
where
    F: Fn(&Connection, &[Value]) -> Result<Value> + Send + Sync,
{
    fn execute(&self, connection: &Connection, arguments: &[Value]) -> Result<Value> {
        self(connection, arguments)
    }
}

impl<F> DatabaseProcedure for F
where
    F: Fn(&Connection, &[Value]) -> Result<()> + Send + Sync,
{
    fn execute(&self, connection: &Connection, arguments: &[Value]) -> Result<()> {
        self(connection, arguments)
    }
}

/// Operations registered for one domain.
#[derive(Clone, Default)]
pub struct DatabaseOperations {
    functions: HashMap<String, Arc<dyn DatabaseFunction>>,
    procedures: HashMap<String, Arc<dyn DatabaseProcedure>>,
    reports: HashMap<String, Arc<dyn ReportFiller>>,
}

impl DatabaseOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, id: impl Into<String>, function: impl DatabaseFunction + 'static) -> Self {
        self.functions.insert(id.into(), Arc::new(function));
        self
    }

    pub fn with_procedure(
        mut self,
        id: impl Into<String>,
        procedure: impl DatabaseProcedure + 'static,
    ) -> Self {
        self.procedures.insert(id.into(), Arc::new(procedure));
        self
    }

    pub fn with_report(mut self, id: impl Into<String>, report: impl ReportFiller + 'static) -> Self {
        self.reports.insert(id.into(), Arc::new(report));
        self
    }

    pub fn function(&self, id: &str) -> Result<Arc<dyn DatabaseFunction>> {
        self.functions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownOperation(format!("function '{}'", id)))
    }

    pub fn procedure(&self, id: &str) -> Result<Arc<dyn DatabaseProcedure>> {
        self.procedures
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownOperation(format!("procedure '{}'", id)))
    }

    pub fn report(&self, id: &str) -> Result<Arc<dyn ReportFiller>> {
        self.reports
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownOperation(format!("report '{}'", id)))
    }
}

impl fmt::Debug for DatabaseOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        let mut procedures: Vec<&String> = self.procedures.keys().collect();
        let mut reports: Vec<&String> = self.reports.keys().collect();
        functions.sort();
        procedures.sort();
        reports.sort();
        f.debug_struct("DatabaseOperations")
            .field("functions", &functions)
            .field("procedures", &procedures)
            .field("reports", &reports)
            .finish()
    }
}
