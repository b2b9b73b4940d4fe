use crate::dto::{DocumentKey, IdentityKey, Record};
use crate::error::ServiceError;
use crate::identity::natural_key;

/// How a record is matched against what is already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyPolicy {
    /// The content identity is the filter: any change yields a new document.
    Content,
    /// Records sharing these fields are the same document; content changes
    /// replace it in place.
    Natural(&'static [&'static str]),
}

impl KeyPolicy {
    pub fn document_key(&self, record: &Record, identity: &IdentityKey) -> DocumentKey {
        match self {
            KeyPolicy::Content => DocumentKey::from(identity),
            KeyPolicy::Natural(fields) => natural_key(record, fields)
                .map(|key| DocumentKey::from(&key))
                .unwrap_or_else(|| DocumentKey::from(identity)),
        }
    }
}

#[derive(Debug)]
pub struct Category {
    /// Key in the JSON data file.
    pub source: &'static str,
    pub collection: &'static str,
}

#[derive(Debug)]
pub struct Dataset {
    pub name: &'static str,
    pub database: &'static str,
    pub snapshot_collection: &'static str,
    pub snapshot_id: &'static str,
    pub categories: &'static [Category],
    pub key_policy: KeyPolicy,
}

pub static PERSONNEL: Dataset = Dataset {
    name: "personnel",
    database: "listic_personnes",
    snapshot_collection: "complete_structure",
    snapshot_id: "all_enseignants",
    categories: &[
        Category { source: "enseignants_chercheurs", collection: "enseignants_chercheurs" },
        Category { source: "émérite", collection: "emerites" },
        Category { source: "doctorants", collection: "doctorants" },
        Category { source: "doctorants_externe", collection: "doctorants_externes" },
        Category { source: "administratif_et_technique", collection: "administratifs_techniques" },
        Category { source: "collaborateurs_benevoles", collection: "collaborateurs_benevoles" },
        Category { source: "chercheurs_associes", collection: "chercheurs_associes" },
    ],
    key_policy: KeyPolicy::Natural(&["name"]),
};

pub static PROJECTS: Dataset = Dataset {
    name: "projects",
    database: "listic_projets",
    snapshot_collection: "complete_structure",
    snapshot_id: "all_projects",
    categories: &[
        Category { source: "Internationaux", collection: "Internationaux" },
        Category { source: "Nationaux", collection: "Nationaux" },
        Category { source: "Regionaux", collection: "Regionaux" },
        Category { source: "Incubation", collection: "Incubation" },
    ],
    key_policy: KeyPolicy::Content,
};

pub static OFFERS: Dataset = Dataset {
    name: "offers",
    database: "listic_offres",
    snapshot_collection: "complete_structure_offres",
    snapshot_id: "all_offres_emploi",
    categories: &[
        Category { source: "postes_enseignant_chercheur", collection: "postes_enseignant_chercheur" },
        Category {
            source: "postes_enseignant_chercheur_contractuel",
            collection: "postes_enseignant_chercheur_contractuel",
        },
        Category { source: "postes_ingenieur", collection: "postes_ingenieur" },
        Category { source: "post_doc", collection: "post_doc" },
        Category { source: "theses", collection: "theses" },
        Category { source: "theses_passees", collection: "theses_passees" },
        Category { source: "stages", collection: "stages" },
    ],
    key_policy: KeyPolicy::Natural(&["url"]),
};

pub static DATASETS: [&Dataset; 3] = [&PERSONNEL, &PROJECTS, &OFFERS];

pub fn lookup(name: &str) -> Result<&'static Dataset, ServiceError> {
    DATASETS
        .iter()
        .copied()
        .find(|dataset| dataset.name == name)
        .ok_or_else(|| {
            ServiceError::bad_request(format!(
                "unknown dataset '{name}', expected one of: personnel, projects, offers"
            ))
        })
}

impl Dataset {
    fn category(&self, source: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.source == source)
    }

    pub fn is_known(&self, source: &str) -> bool {
        self.category(source).is_some()
    }

    /// Collection holding the records of a source category. Unknown
    /// categories keep their own name.
    pub fn collection_for<'a>(&self, source: &'a str) -> &'a str {
        match self.category(source) {
            Some(category) => category.collection,
            None => source,
        }
    }

    /// Unknown categories have no agreed natural key and fall back to content
    /// identity.
    pub fn key_policy_for(&self, source: &str) -> KeyPolicy {
        if self.is_known(source) {
            self.key_policy
        } else {
            KeyPolicy::Content
        }
    }
}
