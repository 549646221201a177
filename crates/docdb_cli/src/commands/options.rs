//! Options command implementation.

use super::CliError;
use docdb_batch::BatchOptions;

/// Runs the options command.
pub fn run(pairs: &[(String, String)]) -> Result<(), CliError> {
    let options = BatchOptions::from_query(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;

    match &options.index_wait {
        Some(wait) => {
            println!("Index wait:");
            println!("  Timeout:          {:?}", wait.timeout);
            println!("  Throw on timeout: {}", wait.throw_on_timeout);
            if wait.specific_indexes.is_empty() {
                println!("  Indexes:          impacted by the batch");
            } else {
                println!("  Indexes:          {}", wait.specific_indexes.join(", "));
            }
        }
        None => println!("Index wait: none"),
    }

    match &options.replication_wait {
        Some(wait) => {
            println!("Replication wait:");
            println!("  Timeout:          {:?}", wait.timeout);
            println!("  Replicas:         {}", wait.replicas);
            println!("  Throw on timeout: {}", wait.throw_on_timeout);
        }
        None => println!("Replication wait: none"),
    }

    Ok(())
}
