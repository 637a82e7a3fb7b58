pub mod installers;
