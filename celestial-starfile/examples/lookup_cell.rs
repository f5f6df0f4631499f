use celestial_starfile::reader::{self, CatalogReader};

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(location), Some(cell)) = (args.next(), args.next()) else {
        anyhow::bail!("Usage: lookup_cell <catalog.dat | https://...> <cell>");
    };
    let cell: u32 = cell.parse()?;

    let catalog = reader::open(&location)?;
    println!("{}", catalog.header());

    let stars = catalog.lookup(cell)?;
    println!("\n{} stars in cell {}:\n", stars.len(), cell);
    for star in &stars {
        println!(
            "  RA={:10.6}° Dec={:+10.6}° pm=({:+.0}, {:+.0}) mas/yr Mag={:6.3}",
            star.ra_deg(),
            star.dec_deg(),
            star.pmra(),
            star.pmdec(),
            star.mag()
        );
    }
    Ok(())
}
