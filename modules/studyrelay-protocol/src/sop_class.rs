//! The storage SOP classes every listener accepts.
//!
//! This is the documented acceptance list of spec behavior: a listener
//! negotiates every class here with the full advertised transfer-syntax
//! list and stores whatever arrives without transcoding.

pub const VERIFICATION: &str = "1.2.840.10008.1.1";

pub const CR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
pub const DX_IMAGE_STORAGE_PRESENTATION: &str = "1.2.840.10008.5.1.4.1.1.1.1";
pub const DX_IMAGE_STORAGE_PROCESSING: &str = "1.2.840.10008.5.1.4.1.1.1.1.1";
pub const MAMMO_IMAGE_STORAGE_PRESENTATION: &str = "1.2.840.10008.5.1.4.1.1.1.2";
pub const MAMMO_IMAGE_STORAGE_PROCESSING: &str = "1.2.840.10008.5.1.4.1.1.1.2.1";
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const ENHANCED_CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2.1";
pub const US_MULTIFRAME_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.3.1";
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
pub const ENHANCED_MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4.1";
pub const MR_SPECTROSCOPY_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4.2";
pub const US_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.6.1";
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";
pub const MULTIFRAME_TRUE_COLOR_SC_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7.4";
pub const XRAY_ANGIO_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.12.1";
pub const XRAY_RF_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.12.2";
pub const NM_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.20";
pub const RAW_DATA_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.66";
pub const VL_ENDOSCOPIC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.1";
pub const VL_MICROSCOPIC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.2";
pub const VL_PHOTOGRAPHIC_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.4";
pub const OPHTHALMIC_PHOTOGRAPHY_8BIT_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.5.1";
pub const OPHTHALMIC_TOMOGRAPHY_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.77.1.5.4";
pub const BASIC_TEXT_SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.11";
pub const ENHANCED_SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.22";
pub const COMPREHENSIVE_SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.33";
pub const KEY_OBJECT_SELECTION_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.59";
pub const ENCAPSULATED_PDF_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.104.1";
pub const PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";
pub const ENHANCED_PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.130";
pub const RT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.1";
pub const RT_DOSE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.2";
pub const RT_STRUCTURE_SET_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.3";
pub const RT_PLAN_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.481.5";

/// Everything a listener accepts for storage.
pub const STORAGE: &[&str] = &[
    CR_IMAGE_STORAGE,
    DX_IMAGE_STORAGE_PRESENTATION,
    DX_IMAGE_STORAGE_PROCESSING,
    MAMMO_IMAGE_STORAGE_PRESENTATION,
    MAMMO_IMAGE_STORAGE_PROCESSING,
    CT_IMAGE_STORAGE,
    ENHANCED_CT_IMAGE_STORAGE,
    US_MULTIFRAME_IMAGE_STORAGE,
    MR_IMAGE_STORAGE,
    ENHANCED_MR_IMAGE_STORAGE,
    MR_SPECTROSCOPY_STORAGE,
    US_IMAGE_STORAGE,
    SECONDARY_CAPTURE_IMAGE_STORAGE,
    MULTIFRAME_TRUE_COLOR_SC_STORAGE,
    XRAY_ANGIO_IMAGE_STORAGE,
    XRAY_RF_IMAGE_STORAGE,
    NM_IMAGE_STORAGE,
    RAW_DATA_STORAGE,
    VL_ENDOSCOPIC_IMAGE_STORAGE,
    VL_MICROSCOPIC_IMAGE_STORAGE,
    VL_PHOTOGRAPHIC_IMAGE_STORAGE,
    OPHTHALMIC_PHOTOGRAPHY_8BIT_STORAGE,
    OPHTHALMIC_TOMOGRAPHY_STORAGE,
    BASIC_TEXT_SR_STORAGE,
    ENHANCED_SR_STORAGE,
    COMPREHENSIVE_SR_STORAGE,
    KEY_OBJECT_SELECTION_STORAGE,
    ENCAPSULATED_PDF_STORAGE,
    PET_IMAGE_STORAGE,
    ENHANCED_PET_IMAGE_STORAGE,
    RT_IMAGE_STORAGE,
    RT_DOSE_STORAGE,
    RT_STRUCTURE_SET_STORAGE,
    RT_PLAN_STORAGE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_catalog_is_nonempty_and_unique() {
        assert!(STORAGE.len() >= 30);
        let mut seen = std::collections::HashSet::new();
        for uid in STORAGE {
            assert!(seen.insert(*uid), "duplicate SOP class {uid}");
            assert!(uid.starts_with("1.2.840.10008.5.1.4.1.1"));
        }
    }
}
