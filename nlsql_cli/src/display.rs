use anyhow::Result;
use colored::Colorize;
use nlsql_core::{Answer, Results};
use nlsql_driver::{QueryResult, Value};
use serde::Serialize;
use std::fmt::Display;
use std::io::Write;
use tabled::builder::Builder;
use tabled::settings::object::{Cell, Rows};
use tabled::settings::{Alignment, Style};

/// How results and messages are written to the terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DisplayOptions {
    pub header: bool,
    pub color: bool,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            header: true,
            color: false,
        }
    }
}

#[derive(Serialize)]
struct JsonAnswer<'a> {
    question: &'a str,
    statement: &'a str,
    results: &'a Results,
}

fn row_label(rows: u64) -> &'static str {
    if rows == 1 { "row" } else { "rows" }
}

fn format_value(value: &Value) -> String {
    if value.is_null() {
        "NULL".to_string()
    } else {
        value.to_string()
    }
}

/// Write query rows as a table followed by a row count, or the affected row count.
pub(crate) fn write_results(
    options: DisplayOptions,
    results: &Results,
    output: &mut dyn Write,
) -> Result<()> {
    let query_result = match results {
        Results::Execute(rows_affected) => {
            writeln!(
                output,
                "{rows_affected} {} affected",
                row_label(*rows_affected)
            )?;
            return Ok(());
        }
        Results::Query(query_result) => query_result,
    };

    let rows = query_result.rows();
    if !query_result.columns().is_empty() {
        let mut builder = Builder::default();
        if options.header {
            builder.push_record(query_result.columns().iter().cloned());
        }

        let mut numeric_cells = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let row_index = if options.header { index + 1 } else { index };
            let mut record = Vec::with_capacity(row.len());
            for (column, value) in row.iter().enumerate() {
                if value.is_numeric() {
                    numeric_cells.push(Cell::new(row_index, column));
                }
                record.push(format_value(value));
            }
            builder.push_record(record);
        }

        let mut table = builder.build();
        table.with(Style::rounded());
        if options.header {
            table.modify(Rows::first(), Alignment::center());
        }
        for cell in numeric_cells {
            table.modify(cell, Alignment::right());
        }
        writeln!(output, "{table}")?;
    }

    let row_count = u64::try_from(rows.len())?;
    writeln!(output, "{row_count} {}", row_label(row_count))?;
    Ok(())
}

/// Write the generated statement, then its results.
pub(crate) fn write_answer(
    options: DisplayOptions,
    answer: &Answer,
    output: &mut dyn Write,
) -> Result<()> {
    let statement = answer.statement.as_str();
    if options.color {
        writeln!(output, "{} {}", "SQL:".bold(), statement.cyan())?;
    } else {
        writeln!(output, "SQL: {statement}")?;
    }
    write_results(options, &answer.results, output)
}

/// Write an answer as a single JSON document.
pub(crate) fn write_json(answer: &Answer, output: &mut dyn Write) -> Result<()> {
    let json_answer = JsonAnswer {
        question: &answer.question,
        statement: answer.statement.as_str(),
        results: &answer.results,
    };
    serde_json::to_writer_pretty(&mut *output, &json_answer)?;
    writeln!(output)?;
    Ok(())
}

/// Write a listing of database or table names, one per line.
pub(crate) fn write_names(
    options: DisplayOptions,
    title: &str,
    names: &[String],
    output: &mut dyn Write,
) -> Result<()> {
    if options.color {
        writeln!(output, "{}", title.bold())?;
    } else {
        writeln!(output, "{title}")?;
    }
    if names.is_empty() {
        writeln!(output, "  (none)")?;
    }
    for name in names {
        writeln!(output, "  {name}")?;
    }
    Ok(())
}

pub(crate) fn write_message<M: Display>(
    options: DisplayOptions,
    message: M,
    output: &mut dyn Write,
) -> Result<()> {
    if options.color {
        writeln!(output, "{}", message.to_string().green())?;
    } else {
        writeln!(output, "{message}")?;
    }
    Ok(())
}

pub(crate) fn write_error<E: Display>(
    options: DisplayOptions,
    error: E,
    output: &mut dyn Write,
) -> Result<()> {
    let message = format!("Error: {error}");
    if options.color {
        writeln!(output, "{}", message.red())?;
    } else {
        writeln!(output, "{message}")?;
    }
    Ok(())
}
