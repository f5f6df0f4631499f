//! Print a catalog file's header and record counts.

use crate::cli::InfoArgs;

use celestial_starfile::reader::{Catalog, CatalogReader};

pub fn run(args: &InfoArgs) -> anyhow::Result<()> {
    let catalog = Catalog::open(&args.path)?;
    let index = catalog.index()?;
    let occupied = index
        .entries()
        .iter()
        .scan(0u32, |previous, &entry| {
            let filled = entry > *previous;
            *previous = entry;
            Some(filled)
        })
        .filter(|&filled| filled)
        .count();

    println!("{}", catalog.header());
    println!("Record size: {} bytes", catalog.codec().record_size());
    println!("Total records: {}", index.total());
    println!("Occupied cells: {}", occupied);
    if occupied > 0 {
        println!(
            "Average records per occupied cell: {:.1}",
            index.total() as f64 / occupied as f64
        );
    }
    println!("File size: {} bytes", catalog.file_size());
    Ok(())
}
