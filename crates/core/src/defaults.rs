use chrono::Utc;

use crate::model::{Category, HandleKind};
use crate::resolver::DirectoryResolver;

struct Preset {
    id: &'static str,
    name: &'static str,
    color: &'static str,
    dirs: &'static [&'static str],
}

// Paths are relative to the storage root.
const PRESETS: &[Preset] = &[
    Preset {
        id: "builtin-whatsapp",
        name: "WhatsApp",
        color: "#25D366",
        dirs: &[
            "Android/media/com.whatsapp/WhatsApp/Media/WhatsApp Images",
            "Android/media/com.whatsapp/WhatsApp/Media/WhatsApp Video",
            "Android/media/com.whatsapp/WhatsApp/Media/WhatsApp Documents",
        ],
    },
    Preset {
        id: "builtin-telegram",
        name: "Telegram",
        color: "#229ED9",
        dirs: &[
            "Telegram/Telegram Images",
            "Telegram/Telegram Video",
            "Telegram/Telegram Documents",
        ],
    },
    Preset {
        id: "builtin-camera",
        name: "Camera",
        color: "#F4B400",
        dirs: &["DCIM/Camera"],
    },
    Preset {
        id: "builtin-screenshots",
        name: "Screenshots",
        color: "#7E57C2",
        dirs: &["Pictures/Screenshots", "DCIM/Screenshots"],
    },
    Preset {
        id: "builtin-downloads",
        name: "Downloads",
        color: "#607D8B",
        dirs: &["Download"],
    },
];

/// Well-known categories created the first time a user has none anywhere.
///
/// Ids are fixed so two devices bootstrapping independently agree on them.
pub fn default_categories(resolver: &DirectoryResolver) -> Vec<Category> {
    let now = Utc::now();
    PRESETS
        .iter()
        .map(|preset| Category {
            id: preset.id.to_string(),
            name: preset.name.to_string(),
            color: preset.color.to_string(),
            directories: preset
                .dirs
                .iter()
                .map(|dir| resolver.handle(dir, HandleKind::BuiltIn))
                .collect(),
            checked: true,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::FsEnumerator;
    use crate::kv::MemoryStore;
    use crate::resolver::{AddressScheme, StaticDialog};
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn presets_are_unique_and_resolved() {
        let scheme = AddressScheme::new("scoped://", "/storage/emulated/0");
        let resolver = DirectoryResolver::new(
            scheme.clone(),
            "Android/media",
            Arc::new(FsEnumerator::new(scheme)),
            Arc::new(StaticDialog { granted: false }),
            Arc::new(MemoryStore::new()),
        );
        let categories = default_categories(&resolver);
        let names: HashSet<_> = categories.iter().map(|c| c.name.to_lowercase()).collect();
        assert_eq!(names.len(), categories.len());
        let camera = categories.iter().find(|c| c.id == "builtin-camera").unwrap();
        assert_eq!(camera.directories[0].resource_uri, "scoped://DCIM%2FCamera");
        assert_eq!(camera.directories[0].kind, HandleKind::BuiltIn);
    }
}
