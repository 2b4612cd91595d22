use anyhow::{bail, Context as _};
use statetie::catalogue::QuestionCatalogue;
use statetie::corpus::{Corpus, PhoneInventory};
use statetie::forest::{build_forest, label_tied_states};
use statetie::prune::{prune_to_leaf_count, prune_tree};
use statetie::{compile, read_tree, write_tree, Config, Tree};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, StructOpt)]
#[structopt(about = "Phonetic-context decision trees for state tying")]
enum Opt {
    /// Builds one tree per base phone and state
    Build {
        #[structopt(flatten)]
        common: Common,
        #[structopt(long, parse(from_os_str))]
        corpus: PathBuf,
        /// Directory receiving `<phone>-<state>.dtree` files
        #[structopt(long, parse(from_os_str))]
        out: PathBuf,
    },
    /// Prunes trees by occupancy and entropy, then to the configured leaf count
    Prune {
        #[structopt(flatten)]
        common: Common,
        #[structopt(long, parse(from_os_str))]
        out: PathBuf,
        #[structopt(parse(from_os_str), required = true)]
        trees: Vec<PathBuf>,
    },
    /// Prints the composite question selecting one cluster of a tree
    Quest {
        #[structopt(flatten)]
        common: Common,
        #[structopt(long, default_value = "1")]
        cluster: u32,
        #[structopt(parse(from_os_str))]
        tree: PathBuf,
    },
    /// Prints a tree with one indented line per node
    Show {
        #[structopt(flatten)]
        common: Common,
        #[structopt(parse(from_os_str))]
        tree: PathBuf,
    },
}

#[derive(Debug, StructOpt)]
struct Common {
    /// JSON configuration; defaults apply when absent
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,
    /// JSON phone inventory with the phone sets
    #[structopt(long, parse(from_os_str))]
    phones: PathBuf,
}

impl Common {
    fn load(&self) -> anyhow::Result<(Config, PhoneInventory)> {
        let config = match &self.config {
            Some(path) => Config::from_path(path)
                .with_context(|| format!("cannot load {}", path.display()))?,
            None => Config::default(),
        };
        let inventory = PhoneInventory::from_path(&self.phones)
            .with_context(|| format!("cannot load {}", self.phones.display()))?;
        Ok((config, inventory))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Opt::from_args() {
        Opt::Build {
            common,
            corpus,
            out,
        } => build(&common, &corpus, &out),
        Opt::Prune { common, out, trees } => prune(&common, &out, &trees),
        Opt::Quest {
            common,
            cluster,
            tree,
        } => quest(&common, cluster, &tree),
        Opt::Show { common, tree } => show(&common, &tree),
    }
}

fn build(common: &Common, corpus: &Path, out: &Path) -> anyhow::Result<()> {
    let (config, inventory) = common.load()?;
    let sets = inventory.phone_sets()?;
    let loaded = Corpus::from_path(corpus)
        .and_then(|c| c.load(&inventory))
        .with_context(|| format!("cannot load {}", corpus.display()))?;
    if loaded.stats.shape().is_continuous() != (config.model == statetie::ModelKind::Continuous) {
        bail!("the corpus statistics do not match the configured model {:?}", config.model);
    }

    let catalogue = QuestionCatalogue::generate(&sets, config.all_phones);
    info!("{} questions over {} phone sets", catalogue.len(), sets.len());
    let mut forest = build_forest(loaded.units()?, &catalogue, &config)?;
    let n_tied = label_tied_states(forest.iter_mut().map(|g| &mut g.outcome.tree));
    info!("{} tied states", n_tied);

    std::fs::create_dir_all(out)?;
    for grown in &forest {
        for w in &grown.outcome.warnings {
            warn!("phone {} state {}: {}", grown.base, grown.state, w);
        }
        let phone = inventory
            .phone_name(grown.base)
            .map_or_else(|| grown.base.to_string(), str::to_owned);
        let path = out.join(format!("{}-{}.dtree", phone, grown.state));
        save(&path, &grown.outcome.tree)?;
    }
    Ok(())
}

fn prune(common: &Common, out: &Path, paths: &[PathBuf]) -> anyhow::Result<()> {
    let (config, inventory) = common.load()?;
    let sets = inventory.phone_sets()?;
    let mut trees = paths
        .iter()
        .map(|path| load(path, &sets))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let options = config.prune_options();
    for (tree, path) in trees.iter_mut().zip(paths) {
        let removed = prune_tree(tree, &options);
        info!("{}: pruned {} nodes", path.display(), removed);
    }
    if let Some(wanted) = config.leaf_target {
        let leaves = prune_to_leaf_count(&mut trees, wanted);
        info!("{} leaves left, {} wanted", leaves, wanted);
    }

    for tree in &mut trees {
        tree.reindex();
    }
    let n_tied = label_tied_states(&mut trees);
    info!("{} tied states", n_tied);

    std::fs::create_dir_all(out)?;
    for (tree, path) in trees.iter().zip(paths) {
        let name = path.file_name().context("tree path has no file name")?;
        save(&out.join(name), tree)?;
    }
    Ok(())
}

fn quest(common: &Common, cluster: u32, path: &Path) -> anyhow::Result<()> {
    let (_, inventory) = common.load()?;
    let mut tree = load(path, &inventory.phone_sets()?)?;
    let labelled = tree
        .leaves()
        .into_iter()
        .any(|id| tree.node(id).and_then(|n| n.cluster()).is_some());
    if !labelled {
        warn!("{}: leaves carry no tied-state ids, numbering them from 0", path.display());
        tree.label_leaves(0);
    }
    let mut question = compile(&tree, cluster)?;
    question.simplify();
    println!("{}", question);
    Ok(())
}

fn show(common: &Common, path: &Path) -> anyhow::Result<()> {
    let (_, inventory) = common.load()?;
    let tree = load(path, &inventory.phone_sets()?)?;
    let stdout = std::io::stdout();
    let mut stdout = stdout.lock();
    write!(stdout, "{}", tree.display())?;
    writeln!(
        stdout,
        "{} nodes, {} leaves, {} twigs",
        tree.count_nodes(),
        tree.count_leaves(),
        tree.count_twigs()
    )?;
    Ok(())
}

fn load(path: &Path, sets: &statetie::question::PhoneSets) -> anyhow::Result<Tree> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    read_tree(BufReader::new(file), sets).with_context(|| format!("cannot read {}", path.display()))
}

fn save(path: &Path, tree: &Tree) -> anyhow::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_tree(&mut writer, tree)?;
    writer.flush()?;
    info!("wrote {}", path.display());
    Ok(())
}
