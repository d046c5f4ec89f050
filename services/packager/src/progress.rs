/// Progress of a package build: entry `index` of `total`, named `label`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageProgress {
    pub index: usize,
    pub total: usize,
    pub label: String,
}
