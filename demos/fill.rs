use dbgcov::config::CoverageConfig;
use dbgcov::coverage::EdgeCoverage;
use dbgcov::filler::CoverageFiller;
use dbgcov::graph::AssemblyGraph;
use dbgcov::index::KmerIndex;
use dbgcov::reads::{Fasta, ReadProcess};
use std::env;
use std::sync::Arc;

const K: usize = 31;
type T = u64;

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args: Vec<String> = env::args().collect();
    let (Some(unitigs), Some(reads)) = (args.get(1), args.get(2)) else {
        anyhow::bail!("usage: fill <unitigs.fa> <reads.fa> [config.json]");
    };
    let config = match args.get(3) {
        Some(path) => CoverageConfig::load(path)?,
        None => CoverageConfig::default(),
    };

    let coverage = Arc::new(EdgeCoverage::new());
    let flanking = Arc::new(config.flanking()?);
    let mut graph = AssemblyGraph::new(K)?;
    graph.add_handler(coverage.clone());
    graph.add_handler(flanking.clone());
    for seq in Fasta::from_file(unitigs)?.sequences()? {
        graph.add_edge(&seq)?;
    }

    let mut index = KmerIndex::<K, T>::new(config.storing);
    index.attach(&graph)?;
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get() as u32);
    index.parallel_count_reads(Fasta::from_file(reads)?, threads, 64)?;
    CoverageFiller::new(&index, &coverage, &flanking)
        .with_threads(config.threads)
        .fill(&mut graph)?;

    let edges = graph.edges();
    println!("edge\tlength\tcoverage\tstart\tend");
    for e in edges.ids() {
        println!(
            "{}\t{}\t{:.2}\t{:.2}\t{:.2}",
            e.index(),
            edges.length(e),
            coverage.coverage(edges, e),
            flanking.coverage_of_start(edges, e),
            flanking.coverage_of_end(edges, e)
        );
    }
    Ok(())
}
