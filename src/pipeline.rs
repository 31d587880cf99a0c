// --- File: src/pipeline.rs ---

//! End-to-end commands built from a [`RunConfig`]: train, evaluate, inspect.

use crate::config::RunConfig;
use crate::data::decode::nifti::encode_f32;
use crate::data::transforms::standard_chain;
use crate::data::index::count_labels;
use crate::data::{
    train_val_split, AutoDecoder, ClassMapping, DataError, DataLoader, Dataset, Decoder, LabelIndex, LabeledSample,
    ScanDataset,
};
use crate::losses::{argmax_rows, cross_entropy};
use crate::metrics::{ConfusionMatrix, Metric};
use crate::model::{build_classifier, Classifier, ModelError};
use crate::optimizers::build_optimizer;
use crate::phase::Phase;
use crate::serialization::checkpoint::WEIGHTS_FILE;
use crate::serialization::{load_checkpoint, tensor_info, BestModelCheckpoint, CheckpointError, CheckpointMeta};
use crate::training::{EpochAccumulator, FitHooks, History, Result, TrainError, Trainer};
use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// History file written into the output directory.
pub const HISTORY_FILE: &str = "history.json";

/// Train and validation datasets sharing one class mapping.
pub struct Datasets {
    pub train: ScanDataset,
    pub val: Option<ScanDataset>,
    pub classes: ClassMapping,
}

/// Reads the label index (or indexes) and builds both datasets.
///
/// The class mapping is `classes` if given, else `data.classes` from the
/// config, else the sorted distinct labels. Every label is checked against
/// it before any image is decoded. Without a separate validation index,
/// `data.val_fraction` of the samples are held out using `seed`.
pub fn load_datasets(config: &RunConfig, seed: u64, classes: Option<ClassMapping>) -> Result<Datasets> {
    let data = &config.data;
    let format = data.index_format();

    let index = LabelIndex::from_path(&data.index_path, &format)?;
    let val_index = match &data.val_index_path {
        Some(path) => Some(LabelIndex::from_path(path, &format)?),
        None => None,
    };
    info!("label index {}: {} samples", data.index_path.display(), index.len());

    let classes = match (classes, &data.classes) {
        (Some(classes), _) => classes,
        (None, Some(names)) => ClassMapping::from_names(names.clone())?,
        (None, None) => {
            let val_labels = val_index.iter().flat_map(|v| v.samples().iter());
            ClassMapping::from_labels(index.samples().iter().chain(val_labels).map(|s| s.label.as_str()))
        }
    };
    classes.validate(index.samples())?;
    if let Some(v) = &val_index {
        classes.validate(v.samples())?;
    }
    for (label, count) in index.class_counts() {
        info!("  class '{label}': {count} samples");
    }

    let (train, val) = match val_index {
        Some(v) => (index.into_samples(), v.into_samples()),
        None if data.val_fraction > 0.0 => train_val_split(index.into_samples(), data.val_fraction, seed),
        None => (index.into_samples(), Vec::new()),
    };
    if train.is_empty() {
        return Err(DataError::EmptyDataset.into());
    }
    info!("{} training / {} validation samples", train.len(), val.len());
    debug!("validation class counts: {:?}", count_labels(&val));

    let root = data.resolved_root();
    let train = ScanDataset::new(
        train,
        &root,
        classes.clone(),
        standard_chain(data, Phase::Train).map_err(DataError::from)?,
        seed,
    )
    .with_sample_shape(data.sample_shape());
    let val = if val.is_empty() {
        warn!("no validation samples; best-model checkpointing is disabled");
        None
    } else {
        Some(ScanDataset::new(
            val,
            &root,
            classes.clone(),
            standard_chain(data, Phase::Eval).map_err(DataError::from)?,
            seed,
        )
        .with_sample_shape(data.sample_shape()))
    };

    Ok(Datasets { train, val, classes })
}

/// Outcome of [`run_training`].
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub history: History,
    pub history_path: PathBuf,
    /// Best validation accuracy and its epoch, if any beat the baseline.
    pub best: Option<(f64, usize)>,
    /// Directory of the best checkpoint, if one was written.
    pub checkpoint_dir: Option<PathBuf>,
}

/// Trains a model as configured.
///
/// Writes `history.json` and, on validation improvements, the best-model
/// checkpoint into `output_dir`.
pub fn run_training(config: &RunConfig) -> Result<RunSummary> {
    let seed = config.train.seed.unwrap_or_else(|| rand::rng().random());
    info!("seed {seed}");

    let Datasets { train, val, classes } = load_datasets(config, seed, None)?;
    let workers = config.train.num_workers;

    let mut train_loader = DataLoader::new(train, config.train.batch_size)?
        .shuffle(config.train.shuffle)
        .drop_last(config.train.drop_last)
        .seed(seed)
        .num_workers(workers)?;
    let mut val_loader = match val {
        Some(val) => Some(DataLoader::new(val, config.train.batch_size)?.num_workers(workers)?),
        None => None,
    };

    let sample_shape = train_loader.dataset().sample_shape()?;
    let mut model = build_classifier(&config.checkpoint.model_name, &sample_shape, classes.len(), seed)?;
    let mut optimizer = build_optimizer(&config.train);

    let output_dir = &config.output_dir;
    fs::create_dir_all(output_dir).map_err(|source| TrainError::Io {
        path: output_dir.clone(),
        source,
    })?;

    let mut trainer = Trainer::from_config(&config.train);
    if let Some(min) = config.checkpoint.min_accuracy {
        trainer = trainer.with_min_accuracy(min);
    }

    let meta = CheckpointMeta::new(model.name(), classes.names().to_vec(), sample_shape)
        .with_learning_rate(optimizer.learning_rate())
        .with_metadata("seed", &seed.to_string());
    let mut sink = BestModelCheckpoint::new(output_dir.join(&config.checkpoint.dir), meta);

    let mut hooks = FitHooks::new();
    if config.checkpoint.enabled {
        hooks = hooks.checkpoint(&mut sink);
    }
    let history = trainer.fit(
        model.as_mut(),
        optimizer.as_mut(),
        &mut train_loader,
        val_loader.as_mut(),
        hooks,
    )?;

    let history_path = output_dir.join(HISTORY_FILE);
    history.save_json(&history_path)?;
    info!("history written to {}", history_path.display());

    let best = trainer.best().best_value().zip(trainer.best().best_epoch());
    let checkpoint_dir = (sink.writes() > 0).then(|| sink.dir().to_path_buf());
    Ok(RunSummary {
        seed,
        history,
        history_path,
        best,
        checkpoint_dir,
    })
}

/// Metrics of a checkpoint on a labelled dataset.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub checkpoint_epoch: usize,
    pub samples: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub class_names: Vec<String>,
    pub confusion: ConfusionMatrix,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "checkpoint from epoch {}: {} samples, loss {:.4}, accuracy {:.4}",
            self.checkpoint_epoch, self.samples, self.loss, self.accuracy
        )?;
        write!(f, "{}", self.confusion.format_table(&self.class_names))
    }
}

/// Evaluates a saved checkpoint.
///
/// Uses the validation index if one is configured, otherwise the held-out
/// split (re-created with the seed stored in the checkpoint), otherwise the
/// whole index.
pub fn run_evaluation(config: &RunConfig, checkpoint_dir: &Path) -> Result<EvalReport> {
    let checkpoint = load_checkpoint(checkpoint_dir)?;
    let meta = &checkpoint.meta;
    info!(
        "loaded {} checkpoint from epoch {} ({} = {:.4})",
        meta.model_name, meta.epoch, meta.metric_name, meta.best_metric
    );
    for (name, shape, dtype) in tensor_info(checkpoint_dir.join(WEIGHTS_FILE)).map_err(CheckpointError::from)? {
        debug!("  {name}: {shape:?} {dtype}");
    }

    let sample_shape = config.data.sample_shape();
    if meta.sample_shape != sample_shape {
        return Err(ModelError::ShapeMismatch {
            what: "sample shape".to_string(),
            expected: meta.sample_shape.clone(),
            actual: sample_shape,
        }
        .into());
    }

    let seed = match (config.train.seed, meta.seed()?) {
        (Some(seed), _) => seed,
        (None, Some(stored)) => stored,
        (None, None) => {
            warn!("checkpoint stores no seed; a held-out split is rebuilt with seed 0");
            0
        }
    };
    let classes = ClassMapping::from_names(meta.class_names.clone())?;
    let Datasets { train, val, classes } = load_datasets(config, seed, Some(classes))?;
    let dataset = match val {
        Some(val) => val,
        None => ScanDataset::new(
            train.samples().to_vec(),
            train.root(),
            classes.clone(),
            standard_chain(&config.data, Phase::Eval).map_err(DataError::from)?,
            seed,
        ),
    };

    let mut model = build_classifier(&meta.model_name, &meta.sample_shape, classes.len(), 0)?;
    model.load_parameters(checkpoint.weights.clone())?;

    let mut loader = DataLoader::new(dataset, config.train.batch_size)?.num_workers(config.train.num_workers)?;
    let mut acc = EpochAccumulator::new();
    let mut confusion = ConfusionMatrix::new(classes.len());
    for batch in loader.iter() {
        let batch = batch?;
        let logits = model.forward(&batch.inputs, Phase::Eval)?;
        let (loss, _) = cross_entropy(&logits, &batch.labels)?;
        let predicted = argmax_rows(&logits);
        acc.add_batch(loss, &predicted, &batch.labels);
        confusion.update(&predicted, &batch.labels);
    }

    Ok(EvalReport {
        checkpoint_epoch: meta.epoch,
        samples: acc.samples(),
        loss: acc.loss()?,
        accuracy: acc.accuracy()?,
        class_names: classes.names().to_vec(),
        confusion,
    })
}

/// Summary of a label index and its first sample.
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub num_samples: usize,
    pub class_counts: BTreeMap<String, usize>,
    pub first_path: PathBuf,
    /// Shape straight out of the decoder.
    pub raw_shape: Vec<usize>,
    /// Shape after the evaluation transform chain.
    pub tensor_shape: Vec<usize>,
    pub min: f32,
    pub max: f32,
}

impl fmt::Display for InspectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} samples", self.num_samples)?;
        for (label, count) in &self.class_counts {
            writeln!(f, "  {label}: {count}")?;
        }
        writeln!(f, "sample 0: {}", self.first_path.display())?;
        writeln!(f, "  decoded shape:     {:?}", self.raw_shape)?;
        writeln!(f, "  transformed shape: {:?}", self.tensor_shape)?;
        write!(f, "  value range:       [{:.4}, {:.4}]", self.min, self.max)
    }
}

/// Decodes and transforms the first sample of the index.
///
/// With `dump`, the transformed tensor is also written there as NIfTI.
pub fn inspect(config: &RunConfig, dump: Option<&Path>) -> Result<InspectReport> {
    let data = &config.data;
    let index = LabelIndex::from_path(&data.index_path, &data.index_format())?;
    let first: LabeledSample = index.samples().first().cloned().ok_or(DataError::EmptyDataset)?;

    let classes = match &data.classes {
        Some(names) => ClassMapping::from_names(names.clone())?,
        None => index.class_mapping(),
    };
    let root = data.resolved_root();
    let first_path = root.join(&first.path);
    let raw = AutoDecoder.decode(&first_path).map_err(DataError::from)?;

    let chain = standard_chain(data, Phase::Eval).map_err(DataError::from)?;
    let dataset = ScanDataset::new(vec![first], &root, classes, chain, 0);
    let (tensor, _) = dataset.get(0)?;

    if let Some(path) = dump {
        let bytes = encode_f32(&tensor).map_err(DataError::from)?;
        fs::write(path, bytes).map_err(|source| TrainError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("transformed sample written to {}", path.display());
    }

    let (min, max) = tensor
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    Ok(InspectReport {
        num_samples: index.len(),
        class_counts: index.class_counts(),
        first_path,
        raw_shape: raw.shape().to_vec(),
        tensor_shape: tensor.shape().to_vec(),
        min,
        max,
    })
}
