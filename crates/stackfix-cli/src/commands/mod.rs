pub mod create_import_template;
pub mod fix_drift;
pub mod fix_stackset;
