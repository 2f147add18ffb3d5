//! Implementation of the best master clock algorithm and its datasets

pub(crate) mod acceptable_master;
pub(crate) mod bmca;
pub(crate) mod dataset_comparison;
pub(crate) mod foreign_master;
