/// Run orchestration: concurrent resolution, then composition.
pub mod run;
