pub mod files;

pub use files::{
    atomic_write, auth_file, config_file, ensure_data_dir, get_data_dir, init_local_data_dir,
    read_file, store_file, DATA_DIR_ENV, DATA_DIR_NAME,
};
