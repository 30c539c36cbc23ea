use std::fmt;

/// Value representation codes from PS3.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vr {
    Ae,
    As,
    At,
    Cs,
    Da,
    Ds,
    Dt,
    Fl,
    Fd,
    Is,
    Lo,
    Lt,
    Ob,
    Od,
    Of,
    Ol,
    Ow,
    Pn,
    Sh,
    Sl,
    Sq,
    Ss,
    St,
    Tm,
    Uc,
    Ui,
    Ul,
    Un,
    Ur,
    Us,
    Ut,
}

impl Vr {
    pub fn from_bytes(b: [u8; 2]) -> Option<Vr> {
        Some(match &b {
            b"AE" => Vr::Ae,
            b"AS" => Vr::As,
            b"AT" => Vr::At,
            b"CS" => Vr::Cs,
            b"DA" => Vr::Da,
            b"DS" => Vr::Ds,
            b"DT" => Vr::Dt,
            b"FL" => Vr::Fl,
            b"FD" => Vr::Fd,
            b"IS" => Vr::Is,
            b"LO" => Vr::Lo,
            b"LT" => Vr::Lt,
            b"OB" => Vr::Ob,
            b"OD" => Vr::Od,
            b"OF" => Vr::Of,
            b"OL" => Vr::Ol,
            b"OW" => Vr::Ow,
            b"PN" => Vr::Pn,
            b"SH" => Vr::Sh,
            b"SL" => Vr::Sl,
            b"SQ" => Vr::Sq,
            b"SS" => Vr::Ss,
            b"ST" => Vr::St,
            b"TM" => Vr::Tm,
            b"UC" => Vr::Uc,
            b"UI" => Vr::Ui,
            b"UL" => Vr::Ul,
            b"UN" => Vr::Un,
            b"UR" => Vr::Ur,
            b"US" => Vr::Us,
            b"UT" => Vr::Ut,
            _ => return None,
        })
    }

    pub fn as_bytes(self) -> [u8; 2] {
        *match self {
            Vr::Ae => b"AE",
            Vr::As => b"AS",
            Vr::At => b"AT",
            Vr::Cs => b"CS",
            Vr::Da => b"DA",
            Vr::Ds => b"DS",
            Vr::Dt => b"DT",
            Vr::Fl => b"FL",
            Vr::Fd => b"FD",
            Vr::Is => b"IS",
            Vr::Lo => b"LO",
            Vr::Lt => b"LT",
            Vr::Ob => b"OB",
            Vr::Od => b"OD",
            Vr::Of => b"OF",
            Vr::Ol => b"OL",
            Vr::Ow => b"OW",
            Vr::Pn => b"PN",
            Vr::Sh => b"SH",
            Vr::Sl => b"SL",
            Vr::Sq => b"SQ",
            Vr::Ss => b"SS",
            Vr::St => b"ST",
            Vr::Tm => b"TM",
            Vr::Uc => b"UC",
            Vr::Ui => b"UI",
            Vr::Ul => b"UL",
            Vr::Un => b"UN",
            Vr::Ur => b"UR",
            Vr::Us => b"US",
            Vr::Ut => b"UT",
        }
    }

    /// Explicit-VR encodings write these with 2 reserved bytes and a
    /// 32-bit length; everything else gets a 16-bit length.
    pub fn has_long_length(self) -> bool {
        matches!(
            self,
            Vr::Ob | Vr::Od | Vr::Of | Vr::Ol | Vr::Ow | Vr::Sq | Vr::Uc | Vr::Un | Vr::Ur | Vr::Ut
        )
    }

    /// Character-string VRs whose values are text, padded to even length
    /// with a trailing space (NUL for UI).
    pub fn is_string(self) -> bool {
        matches!(
            self,
            Vr::Ae
                | Vr::As
                | Vr::Cs
                | Vr::Da
                | Vr::Ds
                | Vr::Dt
                | Vr::Is
                | Vr::Lo
                | Vr::Lt
                | Vr::Pn
                | Vr::Sh
                | Vr::St
                | Vr::Tm
                | Vr::Uc
                | Vr::Ui
                | Vr::Ur
                | Vr::Ut
        )
    }

    /// Padding byte used to bring string values to even length.
    pub fn pad_byte(self) -> u8 {
        if self == Vr::Ui {
            0x00
        } else {
            b' '
        }
    }
}

impl fmt::Display for Vr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.as_bytes();
        write!(f, "{}{}", b[0] as char, b[1] as char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_byte_round_trip() {
        for vr in [Vr::Ae, Vr::Ob, Vr::Sq, Vr::Ui, Vr::Ut, Vr::Pn] {
            assert_eq!(Vr::from_bytes(vr.as_bytes()), Some(vr));
        }
        assert_eq!(Vr::from_bytes(*b"ZZ"), None);
    }

    #[test]
    fn length_form_classification() {
        assert!(Vr::Ob.has_long_length());
        assert!(Vr::Sq.has_long_length());
        assert!(Vr::Ut.has_long_length());
        assert!(!Vr::Ui.has_long_length());
        assert!(!Vr::Pn.has_long_length());
    }

    #[test]
    fn ui_pads_with_nul() {
        assert_eq!(Vr::Ui.pad_byte(), 0x00);
        assert_eq!(Vr::Pn.pad_byte(), b' ');
    }
}
