pub mod archive;
pub mod assemble;
pub mod config;
pub mod drawing;
pub mod filesystem;
pub mod finalize;
pub mod imaging;
pub mod ledger;
pub mod logging;
pub mod records;
pub mod registry;
pub mod relationships;
pub mod remote;
pub mod runtime;
pub mod split_run;
pub mod sync;
pub mod worker;
