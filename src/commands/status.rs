use anyhow::Result;
use surfacemap_core::AppConfig;
use surfacemap_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let storage = Storage::new(&config.database.postgres_url).await?;

    match storage.check_connectivity().await {
        Ok(()) => println!("Database: connected"),
        Err(e) => {
            println!("Database: ERROR - {}", e);
            return Ok(());
        }
    }

    storage.run_migrations().await?;

    println!("\n╔══════════════════════════════════════════════╗");
    println!("║              SurfaceMap Status               ║");
    println!("╠══════════════════════════════════════════════╣");
    for (table, count) in storage.table_counts().await? {
        println!("║ {:<28} {:>12}    ║", table, count);
    }
    println!("╚══════════════════════════════════════════════╝\n");

    Ok(())
}
