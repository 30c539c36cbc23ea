//! A bounded dictionary: the tags the rules engine, de-identifier, and
//! audit diff work with by name, plus VR lookup for implicit-VR decoding.
//!
//! This is deliberately not a full PS3.6 dictionary. Unknown tags decode
//! as UN and pass through untouched.

use crate::tag::Tag;
use crate::vr::Vr;

pub mod tags {
    use crate::tag::Tag;

    pub const SPECIFIC_CHARACTER_SET: Tag = Tag::new(0x0008, 0x0005);
    pub const IMAGE_TYPE: Tag = Tag::new(0x0008, 0x0008);
    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
    pub const SERIES_DATE: Tag = Tag::new(0x0008, 0x0021);
    pub const ACQUISITION_DATE: Tag = Tag::new(0x0008, 0x0022);
    pub const CONTENT_DATE: Tag = Tag::new(0x0008, 0x0023);
    pub const STUDY_TIME: Tag = Tag::new(0x0008, 0x0030);
    pub const SERIES_TIME: Tag = Tag::new(0x0008, 0x0031);
    pub const ACCESSION_NUMBER: Tag = Tag::new(0x0008, 0x0050);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const MANUFACTURER: Tag = Tag::new(0x0008, 0x0070);
    pub const INSTITUTION_NAME: Tag = Tag::new(0x0008, 0x0080);
    pub const INSTITUTION_ADDRESS: Tag = Tag::new(0x0008, 0x0081);
    pub const REFERRING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x0090);
    pub const STATION_NAME: Tag = Tag::new(0x0008, 0x1010);
    pub const STUDY_DESCRIPTION: Tag = Tag::new(0x0008, 0x1030);
    pub const SERIES_DESCRIPTION: Tag = Tag::new(0x0008, 0x103E);
    pub const PERFORMING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x1050);
    pub const OPERATORS_NAME: Tag = Tag::new(0x0008, 0x1070);

    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
    pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);
    pub const OTHER_PATIENT_IDS: Tag = Tag::new(0x0010, 0x1000);
    pub const PATIENT_AGE: Tag = Tag::new(0x0010, 0x1010);
    pub const PATIENT_ADDRESS: Tag = Tag::new(0x0010, 0x1040);
    pub const PATIENT_TELEPHONE_NUMBERS: Tag = Tag::new(0x0010, 0x2154);

    pub const PATIENT_IDENTITY_REMOVED: Tag = Tag::new(0x0012, 0x0062);
    pub const DEIDENTIFICATION_METHOD: Tag = Tag::new(0x0012, 0x0063);

    pub const BODY_PART_EXAMINED: Tag = Tag::new(0x0018, 0x0015);
    pub const PROTOCOL_NAME: Tag = Tag::new(0x0018, 0x1030);
    pub const DEVICE_SERIAL_NUMBER: Tag = Tag::new(0x0018, 0x1000);

    pub const STUDY_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000D);
    pub const SERIES_INSTANCE_UID: Tag = Tag::new(0x0020, 0x000E);
    pub const STUDY_ID: Tag = Tag::new(0x0020, 0x0010);
    pub const SERIES_NUMBER: Tag = Tag::new(0x0020, 0x0011);
    pub const INSTANCE_NUMBER: Tag = Tag::new(0x0020, 0x0013);

    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);
}

/// Resolve a rule tag reference: `gggg,eeee` (with or without parens) or
/// one of the well-known names below.
pub fn resolve(reference: &str) -> Option<Tag> {
    if let Ok(tag) = Tag::parse(reference) {
        return Some(tag);
    }
    by_name(reference)
}

/// Well-known names accepted in rule and pattern references.
pub fn by_name(name: &str) -> Option<Tag> {
    use tags::*;
    Some(match name {
        "SpecificCharacterSet" => SPECIFIC_CHARACTER_SET,
        "ImageType" => IMAGE_TYPE,
        "SOPClassUID" => SOP_CLASS_UID,
        "SOPInstanceUID" => SOP_INSTANCE_UID,
        "StudyDate" => STUDY_DATE,
        "SeriesDate" => SERIES_DATE,
        "AcquisitionDate" => ACQUISITION_DATE,
        "ContentDate" => CONTENT_DATE,
        "StudyTime" => STUDY_TIME,
        "SeriesTime" => SERIES_TIME,
        "AccessionNumber" => ACCESSION_NUMBER,
        "Modality" => MODALITY,
        "Manufacturer" => MANUFACTURER,
        "InstitutionName" => INSTITUTION_NAME,
        "InstitutionAddress" => INSTITUTION_ADDRESS,
        "ReferringPhysicianName" => REFERRING_PHYSICIAN_NAME,
        "StationName" => STATION_NAME,
        "StudyDescription" => STUDY_DESCRIPTION,
        "SeriesDescription" => SERIES_DESCRIPTION,
        "PerformingPhysicianName" => PERFORMING_PHYSICIAN_NAME,
        "OperatorsName" => OPERATORS_NAME,
        "PatientName" => PATIENT_NAME,
        "PatientID" => PATIENT_ID,
        "PatientBirthDate" => PATIENT_BIRTH_DATE,
        "PatientSex" => PATIENT_SEX,
        "OtherPatientIDs" => OTHER_PATIENT_IDS,
        "PatientAge" => PATIENT_AGE,
        "PatientAddress" => PATIENT_ADDRESS,
        "PatientTelephoneNumbers" => PATIENT_TELEPHONE_NUMBERS,
        "PatientIdentityRemoved" => PATIENT_IDENTITY_REMOVED,
        "DeidentificationMethod" => DEIDENTIFICATION_METHOD,
        "BodyPartExamined" => BODY_PART_EXAMINED,
        "ProtocolName" => PROTOCOL_NAME,
        "DeviceSerialNumber" => DEVICE_SERIAL_NUMBER,
        "StudyInstanceUID" => STUDY_INSTANCE_UID,
        "SeriesInstanceUID" => SERIES_INSTANCE_UID,
        "StudyID" => STUDY_ID,
        "SeriesNumber" => SERIES_NUMBER,
        "InstanceNumber" => INSTANCE_NUMBER,
        "PixelData" => PIXEL_DATA,
        _ => return None,
    })
}

/// VR used when decoding implicit-VR datasets. Unknown tags fall back
/// to UN and are carried opaquely.
pub fn vr_for(tag: Tag) -> Vr {
    use tags::*;
    match tag {
        SPECIFIC_CHARACTER_SET | MODALITY | BODY_PART_EXAMINED | PATIENT_SEX | IMAGE_TYPE => Vr::Cs,
        SOP_CLASS_UID | SOP_INSTANCE_UID | STUDY_INSTANCE_UID | SERIES_INSTANCE_UID => Vr::Ui,
        STUDY_DATE | SERIES_DATE | ACQUISITION_DATE | CONTENT_DATE | PATIENT_BIRTH_DATE => Vr::Da,
        STUDY_TIME | SERIES_TIME => Vr::Tm,
        ACCESSION_NUMBER | STATION_NAME | STUDY_ID => Vr::Sh,
        MANUFACTURER | INSTITUTION_NAME | STUDY_DESCRIPTION | SERIES_DESCRIPTION | PATIENT_ID
        | OTHER_PATIENT_IDS | PROTOCOL_NAME | DEVICE_SERIAL_NUMBER | PATIENT_ADDRESS => Vr::Lo,
        INSTITUTION_ADDRESS => Vr::St,
        REFERRING_PHYSICIAN_NAME | PERFORMING_PHYSICIAN_NAME | OPERATORS_NAME | PATIENT_NAME => {
            Vr::Pn
        }
        PATIENT_AGE => Vr::As,
        PATIENT_TELEPHONE_NUMBERS => Vr::Sh,
        PATIENT_IDENTITY_REMOVED => Vr::Cs,
        DEIDENTIFICATION_METHOD => Vr::Lo,
        SERIES_NUMBER | INSTANCE_NUMBER => Vr::Is,
        PIXEL_DATA => Vr::Ow,
        _ => Vr::Un,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_numeric_and_named() {
        assert_eq!(resolve("0010,0020"), Some(tags::PATIENT_ID));
        assert_eq!(resolve("PatientID"), Some(tags::PATIENT_ID));
        assert_eq!(resolve("(0008,0060)"), Some(tags::MODALITY));
        assert_eq!(resolve("NoSuchThing"), None);
    }

    #[test]
    fn implicit_vr_fallback_is_un() {
        assert_eq!(vr_for(Tag::new(0x0099, 0x1002)), Vr::Un);
        assert_eq!(vr_for(tags::PATIENT_NAME), Vr::Pn);
    }
}
