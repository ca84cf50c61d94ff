use anyhow::Result;
use nlsql_core::configuration::Configuration;
use std::io::Write;

/// Get the full version of the program (e.g. "nlsql/0.1.0 Linux/6.8.0/x86_64").
pub(crate) fn full_version(configuration: &Configuration) -> String {
    let program_name = &configuration.program_name;
    let version = &configuration.version;
    let info = os_info::get();
    let os = info.os_type().to_string().replace(' ', "-");
    let os_version = info.version();
    let architecture = info.architecture().unwrap_or("unknown");

    format!("{program_name}/{version} {os}/{os_version}/{architecture}")
}

pub(crate) fn execute(configuration: &Configuration, output: &mut dyn Write) -> Result<()> {
    writeln!(output, "{}", full_version(configuration))?;
    Ok(())
}
