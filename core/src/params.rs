//! Parameter encoding for service calls.
//!
//! # Design
//! Each call builds a fresh `CallParameters` from typed arguments. Omission
//! rules live here and nowhere else: empty id lists, false flags and absent
//! optional strings never reach the wire. Id lists are joined with `,` in the
//! order the caller supplied them.

/// Selection of datafiles, datasets and investigations by numeric id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataSelection {
    datafile_ids: Vec<i64>,
    dataset_ids: Vec<i64>,
    investigation_ids: Vec<i64>,
}

impl DataSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn datafile(mut self, id: i64) -> Self {
        self.datafile_ids.push(id);
        self
    }

    pub fn datafiles(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.datafile_ids.extend(ids);
        self
    }

    pub fn dataset(mut self, id: i64) -> Self {
        self.dataset_ids.push(id);
        self
    }

    pub fn datasets(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.dataset_ids.extend(ids);
        self
    }

    pub fn investigation(mut self, id: i64) -> Self {
        self.investigation_ids.push(id);
        self
    }

    pub fn investigations(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        self.investigation_ids.extend(ids);
        self
    }

    pub fn datafile_ids(&self) -> &[i64] {
        &self.datafile_ids
    }

    pub fn dataset_ids(&self) -> &[i64] {
        &self.dataset_ids
    }

    pub fn investigation_ids(&self) -> &[i64] {
        &self.investigation_ids
    }

    pub fn is_empty(&self) -> bool {
        self.datafile_ids.is_empty() && self.dataset_ids.is_empty() && self.investigation_ids.is_empty()
    }
}

/// Packaging flags for `prepare_data` and `get_data`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub zip: bool,
    pub compress: bool,
}

impl Flags {
    pub const NONE: Flags = Flags { zip: false, compress: false };
    pub const ZIP: Flags = Flags { zip: true, compress: false };
    pub const COMPRESS: Flags = Flags { zip: false, compress: true };
    pub const ZIP_AND_COMPRESS: Flags = Flags { zip: true, compress: true };
}

/// Options for a direct `get_data` download.
///
/// `outname` is a deprecated hint for the served file name. A non-zero
/// `offset` resumes the download with a `Range: bytes=<offset>-` header and is
/// never part of a generated URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataOptions {
    pub flags: Flags,
    pub outname: Option<String>,
    pub offset: u64,
}

impl DataOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn outname(mut self, outname: impl Into<String>) -> Self {
        self.outname = Some(outname.into());
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// Ordered name/value pairs for one call. Inserting an existing name
/// replaces its value, so a mapping never holds duplicate keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallParameters {
    pairs: Vec<(&'static str, String)>,
}

impl CallParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(n, _)| *n == name) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((name, value)),
        }
    }

    /// Insert `value` only when it is present and non-empty.
    pub fn insert_opt(&mut self, name: &'static str, value: Option<&str>) {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.insert(name, value);
        }
    }

    /// Insert the literal `"true"` when `flag` is set; omit otherwise.
    pub fn insert_flag(&mut self, name: &'static str, flag: bool) {
        if flag {
            self.insert(name, "true");
        }
    }

    /// Insert a comma-joined id list; omitted when `ids` is empty.
    pub fn insert_ids(&mut self, name: &'static str, ids: &[i64]) {
        if !ids.is_empty() {
            self.insert(name, join_ids(ids));
        }
    }

    pub fn insert_number(&mut self, name: &'static str, value: i64) {
        self.insert(name, value.to_string());
    }

    pub fn insert_selection(&mut self, selection: &DataSelection) {
        self.insert_ids("investigationIds", &selection.investigation_ids);
        self.insert_ids("datasetIds", &selection.dataset_ids);
        self.insert_ids("datafileIds", &selection.datafile_ids);
    }

    pub fn insert_flags(&mut self, flags: Flags) {
        self.insert_flag("zip", flags.zip);
        self.insert_flag("compress", flags.compress);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.pairs.iter().map(|(n, v)| (*n, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `application/x-www-form-urlencoded` serialization of all pairs.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",")
}

/// Parameters for calls authenticated by a session and scoped by a selection.
pub(crate) fn session_selection(session_id: Option<&str>, selection: &DataSelection) -> CallParameters {
    let mut params = CallParameters::new();
    params.insert_opt("sessionId", session_id);
    params.insert_selection(selection);
    params
}

/// Parameters for calls that refer to earlier prepared data.
pub(crate) fn prepared(prepared_id: &str) -> CallParameters {
    let mut params = CallParameters::new();
    params.insert("preparedId", prepared_id);
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_selection_adds_nothing() {
        let mut params = CallParameters::new();
        params.insert_selection(&DataSelection::new());
        assert!(params.is_empty());
    }

    #[test]
    fn each_list_is_present_only_when_non_empty() {
        let cases = [
            (vec![], vec![], vec![7]),
            (vec![1], vec![], vec![]),
            (vec![], vec![2, 3], vec![]),
            (vec![4, 5], vec![6], vec![8, 9, 10]),
        ];
        for (datafiles, datasets, investigations) in cases {
            let selection = DataSelection::new()
                .datafiles(datafiles.clone())
                .datasets(datasets.clone())
                .investigations(investigations.clone());
            let mut params = CallParameters::new();
            params.insert_selection(&selection);

            for (name, ids) in [
                ("datafileIds", &datafiles),
                ("datasetIds", &datasets),
                ("investigationIds", &investigations),
            ] {
                if ids.is_empty() {
                    assert_eq!(params.get(name), None, "{name} should be omitted");
                } else {
                    assert_eq!(params.get(name), Some(join_ids(ids).as_str()));
                }
            }
        }
    }

    #[test]
    fn ids_keep_caller_order() {
        let selection = DataSelection::new().datafiles([30, 10, 20]).datafile(5);
        let mut params = CallParameters::new();
        params.insert_selection(&selection);
        assert_eq!(params.get("datafileIds"), Some("30,10,20,5"));
    }

    #[test]
    fn negative_and_large_ids_are_plain_decimal() {
        let selection = DataSelection::new().datasets([-1, i64::MAX]);
        let mut params = CallParameters::new();
        params.insert_selection(&selection);
        assert_eq!(params.get("datasetIds"), Some("-1,9223372036854775807"));
    }

    #[test]
    fn flags_only_when_true() {
        let mut params = CallParameters::new();
        params.insert_flags(Flags::NONE);
        assert!(params.is_empty());

        params.insert_flags(Flags::COMPRESS);
        assert_eq!(params.get("compress"), Some("true"));
        assert_eq!(params.get("zip"), None);

        params.insert_flags(Flags::ZIP_AND_COMPRESS);
        assert_eq!(params.get("zip"), Some("true"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn optional_strings_skip_none_and_empty() {
        let mut params = CallParameters::new();
        params.insert_opt("description", None);
        params.insert_opt("doi", Some(""));
        params.insert_opt("outname", Some("x.zip"));
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("outname", "x.zip")]);
    }

    #[test]
    fn insert_replaces_instead_of_duplicating() {
        let mut params = CallParameters::new();
        params.insert("sessionId", "a");
        params.insert("name", "n");
        params.insert("sessionId", "b");
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("sessionId", "b"), ("name", "n")]);
    }

    #[test]
    fn encode_percent_escapes_values() {
        let mut params = CallParameters::new();
        params.insert("outname", "my favourite name");
        params.insert("datasetIds", "1,2");
        assert_eq!(params.encode(), "outname=my+favourite+name&datasetIds=1%2C2");
    }

    #[test]
    fn session_selection_omits_missing_session() {
        let params = session_selection(None, &DataSelection::new().datafile(1));
        assert_eq!(params.get("sessionId"), None);
        assert_eq!(params.get("datafileIds"), Some("1"));
    }
}
