pub mod file_service;
pub mod folder_service;
pub mod object_store;
pub mod policy;
pub mod relay_service;
pub mod upload_service;
