use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Canonical class names, in school order.
pub const CLASS_LEVELS: [&str; 11] = [
    "อนุบาล 2",
    "อนุบาล 3",
    "ประถมศึกษาปีที่ 1",
    "ประถมศึกษาปีที่ 2",
    "ประถมศึกษาปีที่ 3",
    "ประถมศึกษาปีที่ 4",
    "ประถมศึกษาปีที่ 5",
    "ประถมศึกษาปีที่ 6",
    "มัธยมศึกษาปีที่ 1",
    "มัธยมศึกษาปีที่ 2",
    "มัธยมศึกษาปีที่ 3",
];

const CLASS_ABBREVIATIONS: [(&str, &str); 11] = [
    ("อ.2", "อนุบาล 2"),
    ("อ.3", "อนุบาล 3"),
    ("ป.1", "ประถมศึกษาปีที่ 1"),
    ("ป.2", "ประถมศึกษาปีที่ 2"),
    ("ป.3", "ประถมศึกษาปีที่ 3"),
    ("ป.4", "ประถมศึกษาปีที่ 4"),
    ("ป.5", "ประถมศึกษาปีที่ 5"),
    ("ป.6", "ประถมศึกษาปีที่ 6"),
    ("ม.1", "มัธยมศึกษาปีที่ 1"),
    ("ม.2", "มัธยมศึกษาปีที่ 2"),
    ("ม.3", "มัธยมศึกษาปีที่ 3"),
];

const CLASS_QUALIFIER: &str = "ชั้น";

pub const PLACEHOLDER_PREFIX: &str = "TEMP_";

/// Strips a leading "ชั้น" and expands known abbreviations. Unknown input is
/// returned trimmed but otherwise untouched.
pub fn format_class_name(level: &str) -> String {
    let mut clean = level.trim();
    if let Some(rest) = clean.strip_prefix(CLASS_QUALIFIER) {
        clean = rest.trim();
    }
    CLASS_ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == clean)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| clean.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Title {
    #[default]
    #[serde(rename = "เด็กชาย")]
    Boy,
    #[serde(rename = "เด็กหญิง")]
    Girl,
    #[serde(rename = "นาย")]
    Mister,
    #[serde(rename = "นาง")]
    Missus,
    #[serde(rename = "นางสาว")]
    Miss,
    #[serde(rename = "อื่น ๆ")]
    Other,
}

impl Title {
    pub const ALL: [Title; 6] = [
        Title::Boy,
        Title::Girl,
        Title::Mister,
        Title::Missus,
        Title::Miss,
        Title::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Title::Boy => "เด็กชาย",
            Title::Girl => "เด็กหญิง",
            Title::Mister => "นาย",
            Title::Missus => "นาง",
            Title::Miss => "นางสาว",
            Title::Other => "อื่น ๆ",
        }
    }

    pub fn parse(raw: &str) -> Option<Title> {
        let t = raw.trim();
        Self::ALL.into_iter().find(|v| v.as_str() == t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
    #[default]
    #[serde(rename = "ชาย")]
    Male,
    #[serde(rename = "หญิง")]
    Female,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "ชาย",
            Gender::Female => "หญิง",
        }
    }

    pub fn parse(raw: &str) -> Option<Gender> {
        match raw.trim() {
            "ชาย" => Some(Gender::Male),
            "หญิง" => Some(Gender::Female),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BloodGroup {
    #[default]
    #[serde(rename = "ไม่ทราบ")]
    Unknown,
    A,
    B,
    AB,
    O,
}

impl BloodGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            BloodGroup::Unknown => "ไม่ทราบ",
            BloodGroup::A => "A",
            BloodGroup::B => "B",
            BloodGroup::AB => "AB",
            BloodGroup::O => "O",
        }
    }

    pub fn parse(raw: &str) -> Option<BloodGroup> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ไม่ทราบ" => Some(BloodGroup::Unknown),
            "A" => Some(BloodGroup::A),
            "B" => Some(BloodGroup::B),
            "AB" => Some(BloodGroup::AB),
            "O" => Some(BloodGroup::O),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InsuranceStatus {
    #[default]
    #[serde(rename = "ทำประกัน")]
    Insured,
    #[serde(rename = "ไม่ได้ทำประกัน")]
    NotInsured,
}

impl InsuranceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InsuranceStatus::Insured => "ทำประกัน",
            InsuranceStatus::NotInsured => "ไม่ได้ทำประกัน",
        }
    }

    /// Anything other than the exact insured literal is "not insured".
    pub fn from_literal(raw: &str) -> InsuranceStatus {
        if raw == InsuranceStatus::Insured.as_str() {
            InsuranceStatus::Insured
        } else {
            InsuranceStatus::NotInsured
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub house_number: String,
    pub moo: String,
    pub street: String,
    pub sub_district: String,
    pub district: String,
    pub province: String,
}

impl Address {
    fn text_fields(&self) -> [&str; 6] {
        [
            self.house_number.as_str(),
            self.moo.as_str(),
            self.street.as_str(),
            self.sub_district.as_str(),
            self.district.as_str(),
            self.province.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardianInfo {
    pub title: Title,
    pub title_other: String,
    pub first_name: String,
    pub last_name: String,
    pub occupation: String,
    pub phone_number: String,
}

impl Default for GuardianInfo {
    fn default() -> Self {
        GuardianInfo::titled(Title::Mister)
    }
}

impl GuardianInfo {
    pub fn titled(title: Title) -> Self {
        GuardianInfo {
            title,
            title_other: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            occupation: String::new(),
            phone_number: String::new(),
        }
    }

    fn text_fields(&self) -> [&str; 6] {
        [
            self.title.as_str(),
            self.title_other.as_str(),
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.occupation.as_str(),
            self.phone_number.as_str(),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrimaryGuardian {
    #[serde(flatten)]
    pub info: GuardianInfo,
    pub relationship: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DisabilityInfo {
    pub has_disability: bool,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianSource {
    Father,
    Mother,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    pub national_id: String,
    pub student_number: String,
    pub class_level: String,
    pub title: Title,
    pub title_other: String,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub birth_date: String,
    pub phone_number: String,
    #[serde(deserialize_with = "deserialize_measure")]
    pub weight: Option<f64>,
    #[serde(deserialize_with = "deserialize_measure")]
    pub height: Option<f64>,
    pub blood_group: BloodGroup,
    pub ethnicity: String,
    pub nationality: String,
    pub religion: String,
    pub address: Address,
    pub father: GuardianInfo,
    pub mother: GuardianInfo,
    pub parent: PrimaryGuardian,
    pub disability: DisabilityInfo,
    pub insurance_status: InsuranceStatus,
}

impl Default for StudentRecord {
    fn default() -> Self {
        StudentRecord {
            storage_key: None,
            national_id: String::new(),
            student_number: String::new(),
            class_level: String::new(),
            title: Title::Boy,
            title_other: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            gender: Gender::Male,
            birth_date: String::new(),
            phone_number: String::new(),
            weight: None,
            height: None,
            blood_group: BloodGroup::Unknown,
            ethnicity: String::new(),
            nationality: String::new(),
            religion: String::new(),
            address: Address::default(),
            father: GuardianInfo::titled(Title::Mister),
            mother: GuardianInfo::titled(Title::Missus),
            parent: PrimaryGuardian {
                info: GuardianInfo::titled(Title::Mister),
                relationship: String::new(),
            },
            disability: DisabilityInfo::default(),
            insurance_status: InsuranceStatus::Insured,
        }
    }
}

/// Per-field messages keyed by dotted path (`father.firstName`).
#[derive(Debug, Clone, Default, PartialEq, Error)]
#[error("{} field(s) failed validation", .fields.len())]
pub struct ValidationErrors {
    pub fields: BTreeMap<String, String>,
}

impl ValidationErrors {
    fn require(&mut self, path: &str, value: &str, message: &str) {
        if value.trim().is_empty() {
            self.fields.insert(path.to_string(), message.to_string());
        }
    }
}

impl StudentRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    pub fn display_title(&self) -> &str {
        display_title(self.title, &self.title_other)
    }

    pub fn birth_date(&self) -> Option<NaiveDate> {
        parse_iso_date(&self.birth_date)
    }

    /// Whole years completed on `today`.
    pub fn age_on(&self, today: NaiveDate) -> Option<u32> {
        let birth = self.birth_date()?;
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        u32::try_from(age).ok()
    }

    pub fn has_placeholder_number(&self) -> bool {
        self.student_number.starts_with(PLACEHOLDER_PREFIX)
    }

    /// A real student number or a national id. Placeholders don't count.
    pub fn has_identity(&self) -> bool {
        let number = self.student_number.trim();
        (!number.is_empty() && !self.has_placeholder_number())
            || !self.national_id.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::default();
        errs.require("firstName", &self.first_name, "กรุณากรอกชื่อ");
        errs.require("lastName", &self.last_name, "กรุณากรอกนามสกุล");
        if self.national_id.trim().is_empty() {
            errs.fields
                .insert("nationalId".into(), "กรุณากรอกเลขบัตรประชาชน".into());
        } else if !is_national_id(&self.national_id) {
            errs.fields.insert(
                "nationalId".into(),
                "เลขบัตรประชาชนต้องเป็นตัวเลข 13 หลัก".into(),
            );
        }
        if self.birth_date().is_none() {
            errs.fields.insert(
                "birthDate".into(),
                "กรุณาเลือก วัน/เดือน/ปีเกิด ให้ครบถ้วน".into(),
            );
        }
        errs.require("father.firstName", &self.father.first_name, "กรุณากรอกชื่อบิดา");
        errs.require("father.lastName", &self.father.last_name, "กรุณากรอกนามสกุลบิดา");
        errs.require("mother.firstName", &self.mother.first_name, "กรุณากรอกชื่อมารดา");
        errs.require("mother.lastName", &self.mother.last_name, "กรุณากรอกนามสกุลมารดา");
        errs.require(
            "parent.firstName",
            &self.parent.info.first_name,
            "กรุณากรอกชื่อผู้ปกครอง",
        );
        errs.require(
            "parent.lastName",
            &self.parent.info.last_name,
            "กรุณากรอกนามสกุลผู้ปกครอง",
        );
        errs.require(
            "parent.relationship",
            &self.parent.relationship,
            "กรุณาระบุความเกี่ยวข้อง",
        );
        if errs.fields.is_empty() {
            Ok(())
        } else {
            Err(errs)
        }
    }

    /// Shapes a record for the store: blank measures become 0, the class
    /// level is canonical, and the storage key is not part of the body.
    pub fn prepare_for_save(&mut self) {
        self.storage_key = None;
        self.weight = Some(self.weight.unwrap_or(0.0));
        self.height = Some(self.height.unwrap_or(0.0));
        self.class_level = format_class_name(&self.class_level);
    }

    pub fn adopt_guardian(&mut self, source: GuardianSource) {
        let (info, relationship) = match source {
            GuardianSource::Father => (self.father.clone(), "บิดา"),
            GuardianSource::Mother => (self.mother.clone(), "มารดา"),
        };
        self.parent = PrimaryGuardian {
            info,
            relationship: relationship.to_string(),
        };
    }

    /// Every string value at the top level and one level down.
    pub fn search_fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = vec![
            self.national_id.as_str(),
            self.student_number.as_str(),
            self.class_level.as_str(),
            self.title.as_str(),
            self.title_other.as_str(),
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.gender.as_str(),
            self.birth_date.as_str(),
            self.phone_number.as_str(),
            self.blood_group.as_str(),
            self.ethnicity.as_str(),
            self.nationality.as_str(),
            self.religion.as_str(),
            self.insurance_status.as_str(),
        ];
        if let Some(key) = self.storage_key.as_deref() {
            out.push(key);
        }
        out.extend(self.address.text_fields());
        out.extend(self.father.text_fields());
        out.extend(self.mother.text_fields());
        out.extend(self.parent.info.text_fields());
        out.push(self.parent.relationship.as_str());
        out.push(self.disability.description.as_str());
        out
    }
}

fn display_title<'a>(title: Title, title_other: &'a str) -> &'a str {
    if title == Title::Other && !title_other.trim().is_empty() {
        title_other
    } else {
        title.as_str()
    }
}

pub fn is_national_id(s: &str) -> bool {
    s.len() == 13 && s.bytes().all(|b| b.is_ascii_digit())
}

/// Strict `YYYY-MM-DD`.
pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn deserialize_measure<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(n) => Ok(n.as_f64()),
        serde_json::Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                t.parse::<f64>()
                    .map(Some)
                    .map_err(|_| D::Error::custom(format!("not a number: {t}")))
            }
        }
        other => Err(D::Error::custom(format!("not a number: {other}"))),
    }
}
