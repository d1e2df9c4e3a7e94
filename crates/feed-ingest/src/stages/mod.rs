//! Built-in pipeline stages
//!
//! Each stage encapsulates one transformation over a volume and declares
//! its success and failure states statically. Package type stage maps wire
//! these together; the runner never hardcodes an order.

pub mod assemble;
pub mod collate;
pub mod extract_ocr;
pub mod handle;
pub mod image_remediate;
pub mod pack;
pub mod source_mets;
pub mod unpack;
pub mod validate;
pub mod verify_manifest;

use crate::stage::StageCtor;

/// Stage constructors registered with every engine
pub fn builtins() -> Vec<StageCtor> {
    vec![
        || Box::new(unpack::Unpack),
        || Box::new(image_remediate::ImageRemediate),
        || Box::new(extract_ocr::ExtractOcr),
        || Box::new(verify_manifest::VerifyManifest),
        || Box::new(source_mets::SourceMets),
        || Box::new(validate::VolumeValidator),
        || Box::new(pack::Pack),
        || Box::new(assemble::MetsAssembly),
        || Box::new(handle::Handle),
        || Box::new(collate::Collate),
    ]
}

/// Remove a file, tolerating its absence
pub(crate) fn remove_file_quiet(path: &std::path::Path) -> crate::error::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
