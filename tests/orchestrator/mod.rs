//! Lifecycle orchestration scenarios driven by scripted Terraform, InSpec
//! and hosted workspace API doubles.

mod bdd_steps;
mod scenarios;
mod test_helpers;
