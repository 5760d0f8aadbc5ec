//! Demo domain served when no other domain is configured: departments and
//! their employees.

use dalmux_core::{AttributeDefinition, Domain, KeyGenerator, OrderBy, Result, Value, ValueType};
use dalmux_storage::{sql_error, DatabaseOperations, ReportFiller};
use rusqlite::Connection;

pub const DOMAIN: &str = "demo";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS dept (
    deptno INTEGER PRIMARY KEY,
    dname TEXT NOT NULL,
    loc TEXT
);
CREATE TABLE IF NOT EXISTS emp (
    empno INTEGER PRIMARY KEY AUTOINCREMENT,
    ename TEXT NOT NULL,
    job TEXT,
    sal REAL,
    hiredate TEXT,
    deptno INTEGER REFERENCES dept (deptno)
);
";

pub fn domain() -> Result<Domain> {
    let mut domain = Domain::new(DOMAIN);

    let dept = domain.entity_type("dept");
    let deptno = dept.attribute("deptno", ValueType::Integer);
    let dname = dept.attribute("dname", ValueType::Text);
    domain
        .define(&dept)
        .caption("Department")
        .order_by(OrderBy::ascending(&dname))
        .attribute(AttributeDefinition::primary_key(deptno.clone()).caption("No."))
        .attribute(
            AttributeDefinition::column(dname)
                .caption("Name")
                .nullable(false)
                .max_length(14)
                .searchable(true),
        )
        .attribute(
            AttributeDefinition::column(dept.attribute("loc", ValueType::Text))
                .caption("Location")
                .max_length(13),
        )
        .build()?;

    let emp = domain.entity_type("emp");
    let emp_deptno = emp.attribute("deptno", ValueType::Integer);
    domain
        .define(&emp)
        .caption("Employee")
        .key_generator(KeyGenerator::Identity)
        .attribute(AttributeDefinition::primary_key(emp.attribute("empno", ValueType::Integer)))
        .attribute(
            AttributeDefinition::column(emp.attribute("ename", ValueType::Text))
                .caption("Name")
                .nullable(false)
                .max_length(10)
                .searchable(true),
        )
        .attribute(AttributeDefinition::column(emp.attribute("job", ValueType::Text)).max_length(9))
        .attribute(
            AttributeDefinition::column(emp.attribute("sal", ValueType::Real))
                .caption("Salary")
                .range(0.0, 10_000.0),
        )
        .attribute(AttributeDefinition::column(emp.attribute("hiredate", ValueType::Date)))
        .attribute(AttributeDefinition::column(emp_deptno.clone()))
        .attribute(
            AttributeDefinition::foreign_key(emp.attribute("dept", ValueType::Entity), &dept)
                .caption("Department")
                .reference(&emp_deptno, &deptno),
        )
        .build()?;

    Ok(domain)
}

/// Summary line per department: name and head count
struct DepartmentSummary;

impl ReportFiller for DepartmentSummary {
    fn fill(&self, connection: &Connection, _parameters: &[Value]) -> Result<Value> {
        let mut statement = connection
            .prepare(
                "SELECT d.dname, COUNT(e.empno) FROM dept d \
                 LEFT JOIN emp e ON e.deptno = d.deptno GROUP BY d.dname ORDER BY d.dname",
            )
            .map_err(sql_error)?;
        let lines = statement
            .query_map([], |row| {
                Ok(format!("{}: {}", row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(sql_error)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(sql_error)?;
        Ok(Value::Text(lines.join("\n")))
    }
}

pub fn operations() -> DatabaseOperations {
    DatabaseOperations::new()
        .with_function(
            "employee_count",
            |connection: &Connection, arguments: &[Value]| -> Result<Value> {
                let deptno = arguments.first().and_then(Value::as_i64).unwrap_or_default();
                let count: i64 = connection
                    .query_row("SELECT COUNT(*) FROM emp WHERE deptno = ?1", [deptno], |row| {
                        row.get(0)
                    })
                    .map_err(sql_error)?;
                Ok(Value::Integer(count))
            },
        )
        .with_procedure(
            "raise_salaries",
            |connection: &Connection, arguments: &[Value]| -> Result<()> {
                let deptno = arguments.first().and_then(Value::as_i64).unwrap_or_default();
                let percent = arguments.get(1).and_then(Value::as_f64).unwrap_or_default();
                connection
                    .execute(
                        "UPDATE emp SET sal = sal * (1 + ?1 / 100.0) WHERE deptno = ?2",
                        rusqlite::params![percent, deptno],
                    )
                    .map_err(sql_error)?;
                Ok(())
            },
        )
        .with_report("department_summary", DepartmentSummary)
}
