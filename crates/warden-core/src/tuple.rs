use std::fmt;
use std::str::FromStr;

const MAX_NAME_LEN: usize = 64;
const MAX_ID_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TupleError {
    #[error("invalid type name '{0}'")]
    InvalidTypeName(String),
    #[error("invalid relation name '{0}'")]
    InvalidRelationName(String),
    #[error("invalid id '{0}'")]
    InvalidId(String),
    #[error("malformed reference '{0}'")]
    Malformed(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Type and relation names: `[a-z][a-z0-9_]*`, at most 64 characters.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    name.len() <= MAX_NAME_LEN
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Object and subject ids: non-empty, at most 256 characters, no whitespace,
/// `#` or `@` (those delimit the textual tuple form).
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && !id
            .chars()
            .any(|c| c.is_whitespace() || c == '#' || c == '@')
}

fn check_name(name: &str, err: fn(String) -> TupleError) -> Result<(), TupleError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(err(name.to_string()))
    }
}

fn check_id(id: &str) -> Result<(), TupleError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(TupleError::InvalidId(id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), TupleError> {
        check_name(&self.object_type, TupleError::InvalidTypeName)?;
        check_id(&self.object_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

impl FromStr for ObjectRef {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_type, object_id) = s
            .split_once(':')
            .ok_or_else(|| TupleError::Malformed(s.to_string()))?;
        let object = ObjectRef::new(object_type, object_id);
        object.validate()?;
        Ok(object)
    }
}

/// Either a concrete subject or a subject set ("everyone holding `relation`
/// on `subject_type:subject_id`").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectRef {
    Direct {
        subject_type: String,
        subject_id: String,
    },
    Set {
        subject_type: String,
        subject_id: String,
        relation: String,
    },
}

impl SubjectRef {
    pub fn direct(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self::Direct {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
        }
    }

    pub fn set(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self::Set {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            relation: relation.into(),
        }
    }

    pub fn subject_type(&self) -> &str {
        match self {
            Self::Direct { subject_type, .. } | Self::Set { subject_type, .. } => subject_type,
        }
    }

    pub fn subject_id(&self) -> &str {
        match self {
            Self::Direct { subject_id, .. } | Self::Set { subject_id, .. } => subject_id,
        }
    }

    pub fn relation(&self) -> Option<&str> {
        match self {
            Self::Direct { .. } => None,
            Self::Set { relation, .. } => Some(relation),
        }
    }

    pub fn is_set(&self) -> bool {
        matches!(self, Self::Set { .. })
    }

    /// The object half of the subject, e.g. `group:eng` for `group:eng#member`.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(self.subject_type(), self.subject_id())
    }

    pub fn validate(&self) -> Result<(), TupleError> {
        check_name(self.subject_type(), TupleError::InvalidTypeName)?;
        check_id(self.subject_id())?;
        if let Some(relation) = self.relation() {
            check_name(relation, TupleError::InvalidRelationName)?;
        }
        Ok(())
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject_type(), self.subject_id())?;
        if let Some(rel) = self.relation() {
            write!(f, "#{rel}")?;
        }
        Ok(())
    }
}

impl FromStr for SubjectRef {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (object_part, relation) = match s.split_once('#') {
            Some((object_part, relation)) => (object_part, Some(relation)),
            None => (s, None),
        };
        let object: ObjectRef = object_part.parse()?;
        let subject = match relation {
            None => SubjectRef::direct(object.object_type, object.object_id),
            Some(rel) => SubjectRef::set(object.object_type, object.object_id, rel),
        };
        subject.validate()?;
        Ok(subject)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tuple {
    pub object: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
}

impl Tuple {
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }

    pub fn validate(&self) -> Result<(), TupleError> {
        self.object.validate()?;
        check_name(&self.relation, TupleError::InvalidRelationName)?;
        self.subject.validate()
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

impl FromStr for Tuple {
    type Err = TupleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TupleError::Malformed(s.to_string());
        let (object_part, rest) = s.split_once('#').ok_or_else(malformed)?;
        let (relation, subject_part) = rest.split_once('@').ok_or_else(malformed)?;

        let tuple = Tuple::new(object_part.parse()?, relation, subject_part.parse()?);
        tuple.validate()?;
        Ok(tuple)
    }
}

/// Partial match over tuples. `subject_relation: Some(None)` matches only
/// direct subjects; `None` matches either kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
    pub subject_relation: Option<Option<String>>,
}

impl TupleFilter {
    pub fn for_object(object: &ObjectRef, relation: Option<&str>) -> Self {
        Self {
            object_type: Some(object.object_type.clone()),
            object_id: Some(object.object_id.clone()),
            relation: relation.map(str::to_string),
            ..Default::default()
        }
    }

    /// Matches exactly one tuple.
    pub fn exact(tuple: &Tuple) -> Self {
        Self {
            object_type: Some(tuple.object.object_type.clone()),
            object_id: Some(tuple.object.object_id.clone()),
            relation: Some(tuple.relation.clone()),
            subject_type: Some(tuple.subject.subject_type().to_string()),
            subject_id: Some(tuple.subject.subject_id().to_string()),
            subject_relation: Some(tuple.subject.relation().map(str::to_string)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &TupleFilter::default()
    }

    /// The object this filter is pinned to, when both type and id are set.
    pub fn object(&self) -> Option<ObjectRef> {
        match (&self.object_type, &self.object_id) {
            (Some(t), Some(id)) => Some(ObjectRef::new(t, id)),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), TupleError> {
        if self.object_id.is_some() && self.object_type.is_none() {
            return Err(TupleError::InvalidFilter(
                "object_id requires object_type".to_string(),
            ));
        }
        if self.subject_id.is_some() && self.subject_type.is_none() {
            return Err(TupleError::InvalidFilter(
                "subject_id requires subject_type".to_string(),
            ));
        }
        Ok(())
    }

    pub fn matches(&self, tuple: &Tuple) -> bool {
        if let Some(ref ot) = self.object_type
            && ot != &tuple.object.object_type
        {
            return false;
        }
        if let Some(ref oi) = self.object_id
            && oi != &tuple.object.object_id
        {
            return false;
        }
        if let Some(ref r) = self.relation
            && r != &tuple.relation
        {
            return false;
        }
        if let Some(ref st) = self.subject_type
            && st != tuple.subject.subject_type()
        {
            return false;
        }
        if let Some(ref si) = self.subject_id
            && si != tuple.subject.subject_id()
        {
            return false;
        }
        if let Some(ref sr) = self.subject_relation
            && sr.as_deref() != tuple.subject.relation()
        {
            return false;
        }
        true
    }
}
