// algorithm module
pub mod algorithm {
    pub mod scaling;
    pub mod forest;
    pub mod correlation;
    pub mod linkage;
    pub mod leaf_ordering;
}

// data module
pub mod data {
    pub mod population;
    pub mod histogram;
    pub mod contour;
}
