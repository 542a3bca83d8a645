//! Uploaded media: multipart intake, on-disk storage and serving.
//!
//! Files land in `{upload_dir}/{prefix}_{uuid}.{ext}` and are served from
//! `/uploads/{name}`. Capsule media is kept in `{upload_dir}/capsules/`, which
//! the public route cannot reach, and is only streamed once a capsule opens.

pub mod form;
pub mod routes;
pub mod store;
