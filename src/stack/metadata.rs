use log::debug;
use regex::Regex;

/// Tag given to channels whose dye name has no number in it (e.g. DAPI).
pub const UNKNOWN_TAG: &str = "Unknown";

// Ordered map from dye tag to channel name. A channel's index in the stack is
// the position of its name in insertion order, so this can't be a HashMap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelDirectory {
    entries: Vec<(String, String)>,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        return ChannelDirectory {
            entries: Vec::new(),
        };
    }

    // Re-inserting a tag replaces the name but keeps its original position.
    pub fn insert(&mut self, tag: &str, name: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(t, _)| t == tag) {
            entry.1 = name.to_string();
        } else {
            self.entries.push((tag.to_string(), name.to_string()));
        }
    }

    pub fn name(&self, tag: &str) -> Option<&str> {
        return self
            .entries
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, name)| name.as_str());
    }

    /// Index of the first channel carrying `name`.
    pub fn index_of_name(&self, name: &str) -> Option<usize> {
        return self.entries.iter().position(|(_, n)| n == name);
    }

    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        return self.entries.iter().map(|(t, n)| (t.as_str(), n.as_str()));
    }

    /// Build the directory from the XML metadata block embedded in the
    /// microscope container. Every `<Channel Name="...">` element with a
    /// `<DyeName>` child contributes one entry, keyed by the last number in
    /// the dye name.
    pub fn from_metadata_xml(xml: &str) -> ChannelDirectory {
        let channel_re =
            Regex::new(r"(?s)<Channel\b([^>]*?)(?:/>|>(.*?)</Channel>)").unwrap();
        let name_re = Regex::new(r#"\bName="([^"]*)""#).unwrap();
        let dye_re = Regex::new(r"(?s)<DyeName>(.*?)</DyeName>").unwrap();
        let digits_re = Regex::new(r"\d+").unwrap();

        let mut directory = ChannelDirectory::new();
        for caps in channel_re.captures_iter(xml) {
            let attribs = &caps[1];
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");

            let name = match name_re.captures(attribs) {
                Some(name) => name[1].to_string(),
                None => continue,
            };

            let dye = match dye_re.captures(body) {
                Some(dye) => dye[1].to_string(),
                None => continue,
            };

            let tag = digits_re
                .find_iter(&dye)
                .last()
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| UNKNOWN_TAG.to_string());

            debug!("Channel '{}' with dye '{}' -> tag {}", name, dye.trim(), tag);
            directory.insert(&tag, &name);
        }

        return directory;
    }
}
