use patchwise_difflens::parser::{parse_patch, LineKind};

#[test]
fn new_file_patch_positions_match_added_lines() {
    // shape of the `patch` field GitHub returns for an added file
    let patch = "\
@@ -0,0 +1,3 @@
+fn main() {
+    println!(\"hello\");
+}";
    let parsed = parse_patch(patch).unwrap();
    assert_eq!(parsed.max_position(), 3);
    for position in 1..=3 {
        let line = parsed.line(position).unwrap();
        assert_eq!(line.kind, LineKind::Added);
        assert_eq!(line.new_line, Some(position));
        assert!(parsed.is_commentable(position));
    }
}

#[test]
fn every_commentable_position_is_in_bounds() {
    let patch = "\
@@ -10,4 +10,5 @@ impl Server {
     fn start(&self) {
-        self.bind();
+        self.bind()?;
+        self.listen();
     }
@@ -40,3 +41,3 @@ impl Server {
     fn stop(&self) {
-        drop(self);
+        self.shutdown();";
    let parsed = parse_patch(patch).unwrap();
    let max = parsed.max_position();
    let commentable: Vec<u32> = (0..=max + 2).filter(|p| parsed.is_commentable(*p)).collect();
    assert!(commentable.iter().all(|p| *p >= 1 && *p <= max));
    assert_eq!(commentable, vec![1, 2, 3, 4, 5, 7, 8, 9]);
}
