//! ChestX-ray14 class vocabulary.

/// Number of pathology classes.
pub const N_CLASSES: usize = 14;

/// Class names in model output order.
pub const CLASS_NAMES: [&str; N_CLASSES] = [
    "Atelectasis",
    "Cardiomegaly",
    "Effusion",
    "Infiltration",
    "Mass",
    "Nodule",
    "Pneumonia",
    "Pneumothorax",
    "Consolidation",
    "Edema",
    "Emphysema",
    "Fibrosis",
    "Pleural_Thickening",
    "Hernia",
];

/// Finding label used for images without pathology.
pub const NO_FINDING: &str = "No Finding";

/// Output index of a class name.
///
/// Matching ignores case and treats spaces as underscores; the bounding-box
/// file's `Infiltrate` maps to `Infiltration`.
pub fn class_index(name: &str) -> Option<usize> {
    let name = name.trim().replace(' ', "_");
    if name.eq_ignore_ascii_case("Infiltrate") {
        return Some(3);
    }
    CLASS_NAMES
        .iter()
        .position(|class| class.eq_ignore_ascii_case(&name))
}

/// Class name of an output index.
pub fn class_name(index: usize) -> Option<&'static str> {
    CLASS_NAMES.get(index).copied()
}

/// Index of the largest value (first one on ties), `None` for an empty slice.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(idx, _)| idx)
}
