use celestial_starfile::reader::{self, CatalogReader};
use celestial_starfile::{CatalogStar, CatalogType};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Instant;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Parser)]
#[command(name = "query-starfile")]
#[command(about = "Query HEALPix-indexed star catalog files, local or over HTTP")]
struct Cli {
    /// Catalog file path or http(s) URL
    #[arg(long)]
    catalog: String,

    /// Output format for records
    #[arg(long, value_enum, global = true, default_value = "table")]
    format: OutputFormat,

    /// Include flux channels in JSON output
    #[arg(long, global = true)]
    flux: bool,

    /// Print query timing
    #[arg(long, global = true)]
    timing: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print catalog header
    Info,
    /// Records of one cell
    Lookup { cell: u32 },
    /// Records of an inclusive run of cells
    Range { first: u32, last: u32 },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let catalog = reader::open(&cli.catalog)?;

    match cli.command {
        Commands::Info => {
            println!("{}", catalog.header());
        }
        Commands::Lookup { cell } => {
            let start = Instant::now();
            let stars = catalog.lookup(cell)?;
            report_timing(cli.timing, start);
            print_stars(catalog.as_ref(), &stars, &cli.format, cli.flux)?;
        }
        Commands::Range { first, last } => {
            if last < first {
                anyhow::bail!("Empty range: {} > {}", first, last);
            }
            let start = Instant::now();
            let stars = catalog.lookup_range(first..=last)?;
            report_timing(cli.timing, start);
            print_stars(catalog.as_ref(), &stars, &cli.format, cli.flux)?;
        }
    }

    Ok(())
}

fn report_timing(enabled: bool, start: Instant) {
    if enabled {
        eprintln!(
            "Query completed in {:.2} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
}

fn print_stars(
    catalog: &dyn CatalogReader,
    stars: &[CatalogStar],
    format: &OutputFormat,
    flux: bool,
) -> anyhow::Result<()> {
    let photometric = catalog.header().catalog_type == CatalogType::Photometric;
    match format {
        OutputFormat::Table => print_table(stars, photometric),
        OutputFormat::Json => print_json(stars, flux)?,
        OutputFormat::Csv => print_csv(stars, photometric),
    }
    Ok(())
}

fn print_table(stars: &[CatalogStar], photometric: bool) {
    for (i, star) in stars.iter().enumerate() {
        let extra = if photometric {
            format!("FluxExp={}", star.flux.as_ref().map_or(0, |f| f.exponent))
        } else {
            format!("Teff={:.0}K", star.teff())
        };
        println!(
            "{:4}: RA={:.6}° Dec={:+.6}° pmRA={:+.0} pmDec={:+.0} Mag={:6.3} {}",
            i + 1,
            star.ra_deg(),
            star.dec_deg(),
            star.pmra(),
            star.pmdec(),
            star.mag(),
            extra
        );
    }

    if stars.is_empty() {
        println!("No stars in the requested cells.");
    } else {
        println!("\nTotal records: {}", stars.len());
    }
}

#[derive(serde::Serialize)]
struct JsonStar {
    ra_deg: f64,
    dec_deg: f64,
    pmra: f64,
    pmdec: f64,
    teff: f64,
    mag: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    flux_exponent: Option<i8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flux: Option<Vec<f32>>,
}

fn print_json(stars: &[CatalogStar], with_flux: bool) -> anyhow::Result<()> {
    let stars: Vec<JsonStar> = stars
        .iter()
        .map(|s| JsonStar {
            ra_deg: s.ra_deg(),
            dec_deg: s.dec_deg(),
            pmra: s.pmra(),
            pmdec: s.pmdec(),
            teff: s.teff(),
            mag: s.mag(),
            flux_exponent: s.flux.as_ref().map(|f| f.exponent),
            flux: if with_flux { s.flux_values() } else { None },
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&stars)?);
    Ok(())
}

fn print_csv(stars: &[CatalogStar], photometric: bool) {
    if photometric {
        println!("ra_deg,dec_deg,pmra,pmdec,mag,flux_exponent");
    } else {
        println!("ra_deg,dec_deg,pmra,pmdec,teff,mag");
    }
    for s in stars {
        if photometric {
            println!(
                "{},{},{},{},{},{}",
                s.ra_deg(),
                s.dec_deg(),
                s.pmra(),
                s.pmdec(),
                s.mag(),
                s.flux.as_ref().map_or(0, |f| f.exponent)
            );
        } else {
            println!(
                "{},{},{},{},{},{}",
                s.ra_deg(),
                s.dec_deg(),
                s.pmra(),
                s.pmdec(),
                s.teff(),
                s.mag()
            );
        }
    }
}
