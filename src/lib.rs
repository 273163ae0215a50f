#[allow(non_snake_case)]
pub mod StrainedFlame;
#[allow(non_snake_case)]
pub mod Utils;
pub mod settings;
