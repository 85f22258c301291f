//! Kleuren Pipeline Graph
//!
//! Builds the workflow:
//!
//! ```text
//! count_kmers_<g> -> dump_kmers_<g> --\
//!                                      list_colors -> build_bft --\
//! count_super_kmers -> dump_super_kmers ---------------------------> find_bubbles
//! ```
//!
//! One count/dump pair runs per genome; the super-set pair counts all
//! genomes together. The per-genome k-mer files become the colors of the
//! BFT, and kleuren walks it from the super-set k-mers.

use std::path::Path;

use log::info;

use crate::workflow::{GraphError, Process, ProcessId, Workflow};

use super::config::PipelineConfig;
use super::discovery::GenomeSet;

pub const WORKFLOW_NAME: &str = "kleuren";

/// Builds the unsealed pipeline workflow for the discovered genomes.
pub fn build_workflow(config: &PipelineConfig, genomes: &GenomeSet) -> Result<Workflow, GraphError> {
    let mut workflow = Workflow::new(WORKFLOW_NAME);
    let k = i64::from(config.kmer_size);
    let jellyfish = path_str(&config.jellyfish);
    let out_dir = path_str(&genomes.dir);

    let mut kmer_dumps = Vec::with_capacity(genomes.len());
    for genome in &genomes.files {
        let stem = genome
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str(genome));

        let count = workflow.add_process(
            Process::new(
                format!("count_kmers_{}", stem),
                "{p:jellyfish} count -m {p:k} -s {p:hash} -o {o:jfDB} {p:genome}",
            )?
            .with_literal("jellyfish", jellyfish.as_str())?
            .with_literal("k", k)?
            .with_literal("hash", config.single_hash_size.as_str())?
            .with_literal("genome", path_str(genome))?
            .with_output("jfDB", "{p:genome}.{p:k}.jf")?,
        )?;
        let dump = add_dump(
            &mut workflow,
            format!("dump_kmers_{}", stem),
            &jellyfish,
            "{i:jfDB|%.jf}.kmers.txt",
        )?;
        workflow.bind_input(dump, "jfDB", count, "jfDB")?;
        kmer_dumps.push(dump);
    }

    let genome_list = genomes
        .files
        .iter()
        .map(|p| path_str(p))
        .collect::<Vec<_>>()
        .join(" ");
    let count_super = workflow.add_process(
        Process::new(
            "count_super_kmers",
            "{p:jellyfish} count -m {p:k} -s {p:hash} -o {o:jfDB} {p:genomes}",
        )?
        .with_literal("jellyfish", jellyfish.as_str())?
        .with_literal("k", k)?
        .with_literal("hash", config.multi_hash_size.as_str())?
        .with_literal("genomes", genome_list)?
        .with_literal("dir", out_dir.as_str())?
        .with_output("jfDB", "{p:dir}/super.kmers.{p:k}.jf")?,
    )?;
    let dump_super = add_dump(
        &mut workflow,
        "dump_super_kmers".to_string(),
        &jellyfish,
        "{i:jfDB|%.jf}.txt",
    )?;
    workflow.bind_input(dump_super, "jfDB", count_super, "jfDB")?;

    // One color per genome, in discovery order
    let mut list = Process::new(
        "list_colors",
        format!("printf '%s\\n' {} > {{o:colors}}", color_refs(kmer_dumps.len())),
    )?;
    for index in 0..kmer_dumps.len() {
        list.declare_input(format!("kmers{}", index))?;
    }
    let list = workflow.add_process(
        list.with_literal("dir", out_dir.as_str())?
            .with_literal("k", k)?
            .with_output("colors", "{p:dir}/colors.{p:k}.txt")?,
    )?;
    for (index, dump) in kmer_dumps.iter().enumerate() {
        workflow.bind_input(list, &format!("kmers{}", index), *dump, "kmers")?;
    }

    let bft = workflow.add_process(
        Process::new("build_bft", "{p:bft} build {p:k} kmers {i:colors} {o:bft}")?
            .with_literal("bft", path_str(&config.bft))?
            .with_literal("k", k)?
            .with_literal("dir", out_dir.as_str())?
            .with_input("colors")?
            .with_output("bft", "{p:dir}/colors.{p:k}.bft")?,
    )?;
    workflow.bind_input(bft, "colors", list, "colors")?;

    let bubbles = workflow.add_process(
        Process::new(
            "find_bubbles",
            "{p:kleuren} -f {i:bft} -k {p:superKmers} -b {o:bubbles} -n {p:minColors} -d {p:maxDepth}",
        )?
        .with_literal("kleuren", path_str(&config.kleuren))?
        .with_literal("minColors", i64::from(config.min_colors))?
        .with_literal("maxDepth", i64::from(config.max_depth))?
        .with_literal("k", k)?
        .with_literal("dir", out_dir.as_str())?
        .with_input("bft")?
        .with_param("superKmers")?
        .with_output("bubbles", "{p:dir}/bubbles.{p:k}.txt")?,
    )?;
    workflow.bind_input(bubbles, "bft", bft, "bft")?;
    workflow.bind_param_from_output(bubbles, "superKmers", dump_super, "kmers")?;

    info!(
        "Built '{}' workflow: {} genome(s), {} processes",
        WORKFLOW_NAME,
        genomes.len(),
        workflow.len()
    );
    Ok(workflow)
}

/// Adds a `jellyfish dump` process reading `jfDB` and writing `kmers`.
fn add_dump(
    workflow: &mut Workflow,
    name: String,
    jellyfish: &str,
    output: &str,
) -> Result<ProcessId, GraphError> {
    workflow.add_process(
        Process::new(name, "{p:jellyfish} dump -c -o {o:kmers} {i:jfDB}")?
            .with_literal("jellyfish", jellyfish)?
            .with_input("jfDB")?
            .with_output("kmers", output)?,
    )
}

fn color_refs(count: usize) -> String {
    (0..count)
        .map(|i| format!("{{i:kmers{}}}", i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
