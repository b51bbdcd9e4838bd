pub mod manifest;
pub mod measurements;
pub mod prepare;
pub mod preprocess;
pub mod split;

pub use manifest::{load_manifest, write_manifest};
pub use measurements::{load_measurement_table, MeasurementTable};
pub use prepare::{collect_image_files, create_dataset_structure, prepare_dataset, PreparationSummary};
pub use preprocess::{letterbox, open_image, process_image, to_unit_pixels};
pub use split::{make_rng, partition, split_counts, Partition, SplitCounts, SplitRatios};
